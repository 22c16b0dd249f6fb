//! Incremental execution log.
//!
//! A plain-text, human-readable trace of the agent's turns, written line
//! by line as the loop runs so a crashed run still leaves its trail.

use std::io::Write;
use std::path::Path;

pub struct ExecutionLog {
    file: Option<std::fs::File>,
}

impl ExecutionLog {
    /// Open the log for appending. A failure to open degrades to a no-op
    /// log rather than failing the task.
    pub fn open(path: &Path) -> Self {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                tracing::warn!(path = %path.display(), error = %e, "cannot open execution log");
                e
            })
            .ok();
        Self { file }
    }

    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Append one line, flushing immediately.
    pub fn line(&mut self, text: &str) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(file, "{text}");
            let _ = file.flush();
        }
    }

    /// Append every line of a block with the `| ` turn prefix.
    pub fn block(&mut self, text: &str) {
        for line in text.lines() {
            self.line(&format!("| {line}"));
        }
    }

    /// Log a tool invocation with its (possibly truncated) arguments.
    pub fn tool_call(&mut self, name: &str, args: &str) {
        self.line(&format!("| {name} {args}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_incrementally() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("execution.log");
        let mut log = ExecutionLog::open(&path);
        log.block("thinking about it\nstill thinking");
        log.tool_call("read_file", r#"{"path":"a.txt"}"#);
        drop(log);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "| thinking about it\n| still thinking\n| read_file {\"path\":\"a.txt\"}\n"
        );

        // Reopening appends rather than truncates.
        let mut log = ExecutionLog::open(&path);
        log.line("| done");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with("| done\n"));
    }

    #[test]
    fn disabled_log_is_a_no_op() {
        let mut log = ExecutionLog::disabled();
        log.line("goes nowhere");
    }
}
