use std::fmt;
use std::str::FromStr;

/// Author of a conversation message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        })
    }
}

/// One stored conversation message.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Opaque identifier of a stored session document.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Creates a session id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a fresh random session id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the session id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Upstream provider family. Each channel implies one streaming wire shape.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderChannel {
    /// `/v1/chat/completions` with `text/event-stream` framing.
    OpenAiCompatible,
    /// `/api/chat` with newline-delimited JSON framing.
    OllamaCompatible,
}

impl ProviderChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderChannel::OpenAiCompatible => "openai-compatible",
            ProviderChannel::OllamaCompatible => "ollama-compatible",
        }
    }
}

impl fmt::Display for ProviderChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" | "openai_compatible" => {
                Ok(ProviderChannel::OpenAiCompatible)
            }
            "ollama" | "ollama-compatible" | "ollama_compatible" => {
                Ok(ProviderChannel::OllamaCompatible)
            }
            other => Err(format!(
                "unknown provider channel `{other}` (expected `openai` or `ollama`)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).expect("serialize");
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn provider_channel_parses_short_and_long_names() {
        assert_eq!(
            "openai".parse::<ProviderChannel>(),
            Ok(ProviderChannel::OpenAiCompatible)
        );
        assert_eq!(
            " Ollama-Compatible ".parse::<ProviderChannel>(),
            Ok(ProviderChannel::OllamaCompatible)
        );
        assert!("gemini".parse::<ProviderChannel>().is_err());
    }

    #[test]
    fn generated_session_ids_are_distinct() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
