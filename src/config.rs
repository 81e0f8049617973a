use std::{env, str::FromStr, time::Duration};

use crate::backend::{BackendError, ProtocolKind};

pub const LOCAL_BACKEND: &str = "local";
pub const GEMINI_BACKEND: &str = "gemini";

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GEMINI_MODEL: &str = "gemini-pro";
const DEFAULT_LOCAL_BASE_URL: &str = "http://localhost:1234/v1";
const DEFAULT_LOCAL_MODEL: &str = "local-model";

/// Everything the relay reads from the process environment, captured once at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub connect_timeout: Duration,
    pub backends: Vec<BackendSettings>,
}

/// Settings for one upstream before it becomes a [`crate::backend::BackendDescriptor`].
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub id: String,
    pub protocol: ProtocolKind,
    pub base_url: String,
    pub model: String,
    pub streamable: bool,
    pub requires_credential: bool,
    pub credential: Option<String>,
}

impl RelayConfig {
    /// Reads the relay configuration. Fails only on a protocol name that is not recognized.
    pub fn from_env() -> Result<Self, BackendError> {
        let gemini = BackendSettings {
            id: GEMINI_BACKEND.to_owned(),
            protocol: ProtocolKind::GenerateContent,
            base_url: read_string("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_owned()),
            model: read_string("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_owned()),
            streamable: read_bool("GEMINI_STREAM", true),
            requires_credential: true,
            credential: read_string("GOOGLE_API_KEY"),
        };

        let local = BackendSettings {
            id: LOCAL_BACKEND.to_owned(),
            protocol: match read_string("LOCAL_LLM_PROTOCOL") {
                Some(name) => name.parse()?,
                None => ProtocolKind::ChatCompletions,
            },
            base_url: read_string("LOCAL_LLM_BASE_URL").unwrap_or_else(|| DEFAULT_LOCAL_BASE_URL.to_owned()),
            model: read_string("LOCAL_LLM_MODEL").unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_owned()),
            streamable: read_bool("LOCAL_LLM_STREAM", true),
            requires_credential: false,
            credential: read_string("LOCAL_LLM_API_KEY"),
        };

        Ok(Self {
            port: read_parsed("PORT", DEFAULT_PORT),
            connect_timeout: Duration::from_secs(read_parsed("UPSTREAM_CONNECT_TIMEOUT_SECS", 10u64)),
            backends: vec![local, gemini],
        })
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(10),
            backends: Vec::new(),
        }
    }
}

fn read_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn read_parsed<T: FromStr>(name: &str, default: T) -> T {
    read_string(name)
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

fn read_bool(name: &str, default: bool) -> bool {
    read_string(name)
        .and_then(|value| parse_bool(&value))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
