//! Model catalog: short model name → provider credentials and canonical id.
//!
//! API keys are read from the environment at resolution time; a missing key
//! is a fatal configuration error. Unknown model names fall back to the
//! OpenAI configuration with a warning, using the name as-is.

use mark_domain::{Error, Result};

/// One catalog entry.
struct CatalogEntry {
    short_name: &'static str,
    provider: &'static str,
    api_key_var: &'static str,
    canonical_id: &'static str,
}

const CATALOG: &[CatalogEntry] = &[
    // OpenAI
    entry("gpt-4o", "openai", "OPENAI_API_KEY", "gpt-4o"),
    entry("gpt-4.1", "openai", "OPENAI_API_KEY", "gpt-4.1"),
    entry("gpt-4.1-mini", "openai", "OPENAI_API_KEY", "gpt-4.1-mini"),
    entry("gpt-4.1-nano", "openai", "OPENAI_API_KEY", "gpt-4.1-nano"),
    entry("gpt-5", "openai", "OPENAI_API_KEY", "gpt-5"),
    entry("gpt-5-mini", "openai", "OPENAI_API_KEY", "gpt-5-mini"),
    entry("gpt-5-nano", "openai", "OPENAI_API_KEY", "gpt-5-nano"),
    entry("o3", "openai", "OPENAI_API_KEY", "o3"),
    entry("o4-mini", "openai", "OPENAI_API_KEY", "o4-mini"),
    entry("gpt-oss-120b", "openrouter", "OPENROUTER_API_KEY", "openai/gpt-oss-120b"),
    // DeepSeek
    entry("deepseek-chat", "deepseek", "DEEPSEEK_API_KEY", "deepseek-chat"),
    entry("deepseek-reasoner", "deepseek", "DEEPSEEK_API_KEY", "deepseek-reasoner"),
    // Anthropic
    entry("claude-3.7-sonnet", "anthropic", "ANTHROPIC_API_KEY", "claude-3-7-sonnet-20250219"),
    entry("claude-sonnet-4", "anthropic", "ANTHROPIC_API_KEY", "claude-sonnet-4-20250514"),
    entry("claude-opus-4", "anthropic", "ANTHROPIC_API_KEY", "claude-opus-4-20250514"),
    entry("claude-opus-4.1", "anthropic", "ANTHROPIC_API_KEY", "claude-opus-4-1-20250805"),
    // Google
    entry("gemini-2.5-pro", "google", "GEMINI_API_KEY", "gemini-2.5-pro"),
    entry("gemini-2.5-flash", "google", "GEMINI_API_KEY", "gemini-2.5-flash"),
    // Moonshot
    entry("kimi-k2-0711", "moonshot", "MOONSHOT_API_KEY", "kimi-k2-0711-preview"),
    entry("kimi-k2-0905", "moonshot", "MOONSHOT_API_KEY", "kimi-k2-0905-preview"),
    // xAI
    entry("grok-4", "xai", "GROK_API_KEY", "grok-4-0709"),
    entry("grok-code-fast-1", "xai", "GROK_API_KEY", "grok-code-fast-1"),
    // Qwen
    entry("qwen-3-coder-plus", "qwen", "DASHSCOPE_API_KEY", "qwen3-coder-plus"),
    entry("qwen-3-max", "qwen", "DASHSCOPE_API_KEY", "qwen3-max-preview"),
    // Zhipu (served through OpenRouter)
    entry("glm-4.5", "openrouter", "OPENROUTER_API_KEY", "z-ai/glm-4.5"),
];

const fn entry(
    short_name: &'static str,
    provider: &'static str,
    api_key_var: &'static str,
    canonical_id: &'static str,
) -> CatalogEntry {
    CatalogEntry {
        short_name,
        provider,
        api_key_var,
        canonical_id,
    }
}

/// Default chat-completions base URL per provider. Overridable via
/// `<PROVIDER>_BASE_URL` (upper-cased provider name).
fn default_base_url(provider: &str) -> &'static str {
    match provider {
        "openai" => "https://api.openai.com/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "anthropic" => "https://api.anthropic.com/v1",
        "google" => "https://generativelanguage.googleapis.com/v1beta/openai",
        "moonshot" => "https://api.moonshot.ai/v1",
        "xai" => "https://api.x.ai/v1",
        "qwen" => "https://dashscope-intl.aliyuncs.com/compatible-mode/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        _ => "https://api.openai.com/v1",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ModelSpec / ModelCatalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fully resolved model configuration.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub short_name: String,
    pub provider: String,
    pub canonical_id: String,
    pub api_key: String,
    pub base_url: String,
}

impl ModelSpec {
    /// Whether the model is served by Anthropic. The substring is
    /// deliberately loose: it matches `claude-*`, date-suffixed ids, and
    /// provider-prefixed aliases alike.
    pub fn is_anthropic(&self) -> bool {
        self.canonical_id.contains("claud")
    }
}

/// Read-only catalog, resolved once at startup.
pub struct ModelCatalog;

impl ModelCatalog {
    /// Resolve a short model name into a [`ModelSpec`].
    ///
    /// Unknown names get the default OpenAI configuration; a missing API
    /// key environment variable is fatal.
    pub fn resolve(short_name: &str) -> Result<ModelSpec> {
        let (provider, api_key_var, canonical_id) = match CATALOG
            .iter()
            .find(|e| e.short_name == short_name)
        {
            Some(e) => (e.provider, e.api_key_var, e.canonical_id.to_string()),
            None => {
                tracing::warn!(
                    model = %short_name,
                    "model not in the supported list, using default OpenAI configuration"
                );
                ("openai", "OPENAI_API_KEY", short_name.to_string())
            }
        };

        let api_key = std::env::var(api_key_var).map_err(|_| {
            Error::Config(format!("Missing required environment variable: {api_key_var}"))
        })?;

        let base_url_var = format!("{}_BASE_URL", provider.to_uppercase());
        let base_url = std::env::var(&base_url_var)
            .unwrap_or_else(|_| default_base_url(provider).to_string());

        Ok(ModelSpec {
            short_name: short_name.to_string(),
            provider: provider.to_string(),
            canonical_id,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// All short names the catalog knows about.
    pub fn supported_models() -> Vec<&'static str> {
        CATALOG.iter().map(|e| e.short_name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_resolves() {
        std::env::set_var("DEEPSEEK_API_KEY", "sk-test");
        let spec = ModelCatalog::resolve("deepseek-chat").unwrap();
        assert_eq!(spec.provider, "deepseek");
        assert_eq!(spec.canonical_id, "deepseek-chat");
        assert_eq!(spec.base_url, "https://api.deepseek.com/v1");
    }

    #[test]
    fn missing_key_is_config_error() {
        std::env::remove_var("MOONSHOT_API_KEY");
        let err = ModelCatalog::resolve("kimi-k2-0711").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn unknown_model_falls_back_to_openai() {
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        let spec = ModelCatalog::resolve("totally-new-model").unwrap();
        assert_eq!(spec.provider, "openai");
        assert_eq!(spec.canonical_id, "totally-new-model");
    }

    #[test]
    fn anthropic_detection_is_forgiving() {
        let spec = ModelSpec {
            short_name: "claude-sonnet-4".into(),
            provider: "anthropic".into(),
            canonical_id: "claude-sonnet-4-20250514".into(),
            api_key: "k".into(),
            base_url: "https://api.anthropic.com/v1".into(),
        };
        assert!(spec.is_anthropic());

        let alias = ModelSpec {
            canonical_id: "bedrock/claudius".into(),
            ..spec.clone()
        };
        assert!(alias.is_anthropic());

        let other = ModelSpec {
            canonical_id: "gpt-4o".into(),
            ..spec
        };
        assert!(!other.is_anthropic());
    }

    #[test]
    fn base_url_env_override() {
        std::env::set_var("OPENAI_API_KEY", "sk-test");
        std::env::set_var("OPENAI_BASE_URL", "http://localhost:8000/v1/");
        let spec = ModelCatalog::resolve("gpt-4o").unwrap();
        assert_eq!(spec.base_url, "http://localhost:8000/v1");
        std::env::remove_var("OPENAI_BASE_URL");
    }

    #[test]
    fn catalog_covers_major_families() {
        let models = ModelCatalog::supported_models();
        assert!(models.contains(&"gpt-4o"));
        assert!(models.contains(&"claude-sonnet-4"));
        assert!(models.contains(&"gemini-2.5-pro"));
        assert!(models.contains(&"deepseek-chat"));
    }
}
