use std::str::FromStr;
use std::time::Duration;

use crate::errors::RelayError;
use crate::model::ProviderChannel;

pub const ENV_PROVIDER: &str = "CHAT_RELAY_PROVIDER";
pub const ENV_MODEL: &str = "CHAT_RELAY_MODEL";
pub const ENV_BASE_URL: &str = "CHAT_RELAY_BASE_URL";
pub const ENV_API_KEY: &str = "CHAT_RELAY_API_KEY";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_CONTEXT_WINDOW: &str = "CHAT_RELAY_CONTEXT_WINDOW";
pub const ENV_MAX_OUTPUT_TOKENS: &str = "CHAT_RELAY_MAX_OUTPUT_TOKENS";
pub const ENV_IDLE_TIMEOUT_SECS: &str = "CHAT_RELAY_IDLE_TIMEOUT_SECS";
pub const ENV_STREAM_BUFFER: &str = "CHAT_RELAY_STREAM_BUFFER";

const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_OLLAMA_MODEL: &str = "llama3";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Per-turn relay settings.
///
/// Passed by value into every turn so a turn never observes a configuration
/// change made while it is streaming.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Upstream provider family; selects the wire format.
    pub channel: ProviderChannel,
    /// Provider-specific model identifier.
    pub model: String,
    /// Context-window size forwarded to providers that accept one.
    pub context_window: Option<u32>,
    /// Upper bound on generated tokens.
    pub max_output_tokens: Option<u32>,
    /// Longest tolerated gap between upstream reads. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Bounded client event queue size.
    pub stream_buffer_capacity: usize,
}

impl RelayConfig {
    /// Creates a config for `channel` and `model` with default limits.
    pub fn new(channel: ProviderChannel, model: impl Into<String>) -> Self {
        Self {
            channel,
            model: model.into(),
            context_window: None,
            max_output_tokens: None,
            idle_timeout: Some(Duration::from_secs(60)),
            stream_buffer_capacity: 64,
        }
    }

    /// Reads `CHAT_RELAY_*` variables. Unset values fall back to defaults;
    /// set but unparsable values are errors.
    pub fn from_env() -> Result<Self, RelayError> {
        let channel = env_parse::<ProviderChannel>(ENV_PROVIDER)?
            .unwrap_or(ProviderChannel::OpenAiCompatible);
        let model = env_string(ENV_MODEL).unwrap_or_else(|| default_model(channel).to_string());
        let mut config = Self::new(channel, model);
        config.context_window = env_parse(ENV_CONTEXT_WINDOW)?;
        config.max_output_tokens = env_parse(ENV_MAX_OUTPUT_TOKENS)?;
        if let Some(secs) = env_parse::<u64>(ENV_IDLE_TIMEOUT_SECS)? {
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(capacity) = env_parse(ENV_STREAM_BUFFER)? {
            config.stream_buffer_capacity = capacity;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn context_window(mut self, tokens: u32) -> Self {
        self.context_window = Some(tokens);
        self
    }

    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn idle_timeout(mut self, idle: Option<Duration>) -> Self {
        self.idle_timeout = idle;
        self
    }

    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.model.trim().is_empty() {
            return Err(RelayError::Config("model must not be empty".into()));
        }
        if self.stream_buffer_capacity == 0 {
            return Err(RelayError::Config(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.idle_timeout.is_some_and(|d| d.is_zero()) {
            return Err(RelayError::Config(
                "idle_timeout must be positive when set".into(),
            ));
        }
        Ok(())
    }
}

/// Where and how to reach the upstream provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    pub base_url: String,
    /// Bearer token; OpenAI-compatible endpoints usually need one.
    pub api_key: Option<String>,
    /// Bound on establishing the connection (not on streaming).
    pub connect_timeout: Duration,
}

impl EndpointConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Default endpoint for a provider channel.
    pub fn for_channel(channel: ProviderChannel) -> Self {
        Self::new(match channel {
            ProviderChannel::OpenAiCompatible => DEFAULT_OPENAI_BASE_URL,
            ProviderChannel::OllamaCompatible => DEFAULT_OLLAMA_BASE_URL,
        })
    }

    /// Reads `CHAT_RELAY_BASE_URL` and `CHAT_RELAY_API_KEY` (falling back to
    /// `OPENAI_API_KEY`).
    pub fn from_env(channel: ProviderChannel) -> Self {
        let mut config = Self::for_channel(channel);
        if let Some(base_url) = env_string(ENV_BASE_URL) {
            config.base_url = base_url;
        }
        config.api_key = env_string(ENV_API_KEY).or_else(|| env_string(ENV_OPENAI_API_KEY));
        config
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

pub fn default_model(channel: ProviderChannel) -> &'static str {
    match channel {
        ProviderChannel::OpenAiCompatible => DEFAULT_OPENAI_MODEL,
        ProviderChannel::OllamaCompatible => DEFAULT_OLLAMA_MODEL,
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>, RelayError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| RelayError::Config(format!("invalid {key}={raw}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RelayConfig::new(ProviderChannel::OllamaCompatible, "llama3");
        assert!(config.validate().is_ok());
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn validation_rejects_empty_model_and_zero_buffer() {
        let empty = RelayConfig::new(ProviderChannel::OpenAiCompatible, " ");
        assert!(matches!(empty.validate(), Err(RelayError::Config(_))));
        let zero = RelayConfig::new(ProviderChannel::OpenAiCompatible, "m").stream_buffer_capacity(0);
        assert!(matches!(zero.validate(), Err(RelayError::Config(_))));
        let idle = RelayConfig::new(ProviderChannel::OpenAiCompatible, "m")
            .idle_timeout(Some(Duration::ZERO));
        assert!(idle.validate().is_err());
    }

    #[test]
    fn endpoint_url_joins_without_double_slash() {
        let endpoint = EndpointConfig::new("http://localhost:11434/");
        assert_eq!(endpoint.url("/api/chat"), "http://localhost:11434/api/chat");
    }

    #[test]
    fn channel_defaults() {
        assert_eq!(
            EndpointConfig::for_channel(ProviderChannel::OllamaCompatible).base_url,
            "http://localhost:11434"
        );
        assert_eq!(default_model(ProviderChannel::OpenAiCompatible), "gpt-3.5-turbo");
    }
}
