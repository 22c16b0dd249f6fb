//! Scoped verification environment.
//!
//! The verifier subprocess inherits its configuration through environment
//! variables. Those are process-global, so they are treated as a scoped
//! acquisition: set when the guard is created, removed when it drops, on
//! every exit path. Nothing leaks into the next task.

/// RAII guard over the verification environment variables.
pub struct VerificationEnv {
    keys: Vec<String>,
}

impl VerificationEnv {
    /// Set every `(key, value)` pair in the process environment.
    pub fn set(vars: Vec<(String, String)>) -> Self {
        let mut keys = Vec::with_capacity(vars.len());
        for (key, value) in vars {
            tracing::debug!(key = %key, "setting verification env var");
            std::env::set_var(&key, &value);
            keys.push(key);
        }
        Self { keys }
    }
}

impl Drop for VerificationEnv {
    fn drop(&mut self) {
        for key in &self.keys {
            tracing::debug!(key = %key, "clearing verification env var");
            std::env::remove_var(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_and_clears() {
        assert!(std::env::var("MARK_TEST_GUARD_A").is_err());
        {
            let _guard = VerificationEnv::set(vec![
                ("MARK_TEST_GUARD_A".into(), "1".into()),
                ("MARK_TEST_GUARD_B".into(), "two".into()),
            ]);
            assert_eq!(std::env::var("MARK_TEST_GUARD_A").unwrap(), "1");
            assert_eq!(std::env::var("MARK_TEST_GUARD_B").unwrap(), "two");
        }
        assert!(std::env::var("MARK_TEST_GUARD_A").is_err());
        assert!(std::env::var("MARK_TEST_GUARD_B").is_err());
    }

    #[test]
    fn clears_on_unwind() {
        let result = std::panic::catch_unwind(|| {
            let _guard = VerificationEnv::set(vec![("MARK_TEST_GUARD_C".into(), "x".into())]);
            panic!("verifier blew up");
        });
        assert!(result.is_err());
        assert!(std::env::var("MARK_TEST_GUARD_C").is_err());
    }
}
