//! Configuration
//!
//! Startup configuration for the conductor, read once and immutable
//! afterwards. Sources are layered, later ones winning:
//!
//! 1. Built-in defaults
//! 2. TOML file (`--config <path>` or `$XDG_CONFIG_HOME/thera/config.toml`)
//! 3. Environment variables
//! 4. [`ConfigOverrides`] (command-line flags)
//!
//! # Environment Variables
//!
//! - `THERA_PROVIDER`: `cloud`/`gemini` or `local`/`ollama`
//! - `GEMINI_API_KEY`, `GEMINI_MODEL`, `GEMINI_BASE_URL`
//! - `OLLAMA_BASE_URL`, `OLLAMA_MODEL`
//! - `THERA_BIND`: listen address for the WebSocket server
//! - `THERA_KEEPALIVE_SECS`: keepalive ping interval
//! - `THERA_MEMORY_CAP`: turns retained per session
//! - `THERA_MAX_FRAME_BYTES`: largest accepted inbound frame
//! - `THERA_REQUEST_TIMEOUT_SECS`: backend HTTP timeout
//! - `THERA_PERSONAS_DIR`: directory of persona TOML files
//!
//! # Example File
//!
//! ```toml
//! provider = "local"
//! memory_cap = 20
//!
//! [local]
//! base_url = "http://localhost:11434"
//! model = "llama3"
//!
//! [server]
//! bind_address = "127.0.0.1:8787"
//! keepalive_interval_secs = 30
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::memory::DEFAULT_MEMORY_CAP;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config file {path:?}: {message}")]
    Parse {
        /// File path (empty when parsing a string)
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Provider id outside the supported set
    #[error("unknown provider '{0}' (expected 'cloud' or 'local')")]
    InvalidProvider(String),

    /// Selected provider has no credential
    #[error("no API key configured for the {provider} provider (set {env_var})")]
    MissingCredential {
        /// Provider name
        provider: &'static str,
        /// Variable that supplies the credential
        env_var: &'static str,
    },

    /// A setting has an unusable value
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue {
        /// Setting name
        key: String,
        /// Rejected value
        value: String,
    },

    /// HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Which backend serves generation for the whole process
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Hosted Gemini API
    #[default]
    #[serde(alias = "gemini")]
    Cloud,
    /// Ollama server on this machine
    #[serde(alias = "ollama")]
    Local,
}

impl ProviderKind {
    /// Name reported to clients and logs
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Cloud => "gemini",
            Self::Local => "ollama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cloud" | "gemini" => Ok(Self::Cloud),
            "local" | "ollama" => Ok(Self::Local),
            _ => Err(ConfigError::InvalidProvider(s.to_string())),
        }
    }
}

/// Cloud backend settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSettings {
    /// API key (also read from `GEMINI_API_KEY`)
    pub api_key: Option<String>,
    /// Model identifier
    pub model: String,
    /// API base URL, up to and excluding `/models`
    pub base_url: String,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

impl fmt::Debug for CloudSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl CloudSettings {
    /// API key, if present and non-blank
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

/// Local backend settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    /// Base URL of the Ollama server
    pub base_url: String,
    /// Model name
    pub model: String,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
        }
    }
}

/// WebSocket server settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen address
    pub bind_address: String,
    /// Seconds between keepalive pings
    pub keepalive_interval_secs: u64,
    /// Largest accepted inbound text frame
    pub max_frame_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8787".to_string(),
            keepalive_interval_secs: 30,
            max_frame_bytes: 64 * 1024,
        }
    }
}

/// Complete conductor configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Active provider for the process lifetime
    pub provider: ProviderKind,
    /// Cloud backend settings
    pub cloud: CloudSettings,
    /// Local backend settings
    pub local: LocalSettings,
    /// Server settings
    pub server: ServerSettings,
    /// Turns retained per session
    pub memory_cap: usize,
    /// Backend HTTP timeout in seconds
    pub request_timeout_secs: u64,
    /// Directory of persona TOML files (built-ins only when unset)
    pub personas_dir: Option<PathBuf>,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            cloud: CloudSettings::default(),
            local: LocalSettings::default(),
            server: ServerSettings::default(),
            memory_cap: DEFAULT_MEMORY_CAP,
            request_timeout_secs: 120,
            personas_dir: None,
        }
    }
}

/// Command-line overrides, applied last
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Provider id
    pub provider: Option<String>,
    /// Listen address
    pub bind_address: Option<String>,
    /// Persona directory
    pub personas_dir: Option<PathBuf>,
}

impl ConductorConfig {
    /// Parse a TOML document on top of the defaults
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })
    }

    /// Apply environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply variables from an arbitrary lookup
    ///
    /// An unknown provider id is an error. Unparseable numbers are logged
    /// and the current value kept.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(provider) = lookup("THERA_PROVIDER") {
            self.provider = provider.parse()?;
        }
        if let Some(key) = lookup("GEMINI_API_KEY") {
            self.cloud.api_key = Some(key);
        }
        if let Some(model) = lookup("GEMINI_MODEL") {
            self.cloud.model = model;
        }
        if let Some(url) = lookup("GEMINI_BASE_URL") {
            self.cloud.base_url = url;
        }
        if let Some(url) = lookup("OLLAMA_BASE_URL") {
            self.local.base_url = url;
        }
        if let Some(model) = lookup("OLLAMA_MODEL") {
            self.local.model = model;
        }
        if let Some(bind) = lookup("THERA_BIND") {
            self.server.bind_address = bind;
        }
        if let Some(dir) = lookup("THERA_PERSONAS_DIR") {
            self.personas_dir = Some(PathBuf::from(dir));
        }

        parse_into(&lookup, "THERA_KEEPALIVE_SECS", &mut self.server.keepalive_interval_secs);
        parse_into(&lookup, "THERA_MAX_FRAME_BYTES", &mut self.server.max_frame_bytes);
        parse_into(&lookup, "THERA_MEMORY_CAP", &mut self.memory_cap);
        parse_into(&lookup, "THERA_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);

        Ok(())
    }

    /// Apply command-line overrides
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<(), ConfigError> {
        if let Some(ref provider) = overrides.provider {
            self.provider = provider.parse()?;
        }
        if let Some(ref bind) = overrides.bind_address {
            self.server.bind_address = bind.clone();
        }
        if let Some(ref dir) = overrides.personas_dir {
            self.personas_dir = Some(dir.clone());
        }
        Ok(())
    }

    /// Problems with the selected provider's settings
    ///
    /// Only the active provider is inspected; an unused backend's settings
    /// never produce warnings. None of these are fatal.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut problems = Vec::new();
        match self.provider {
            ProviderKind::Cloud => {
                if self.cloud.api_key().is_none() {
                    problems.push(ConfigError::MissingCredential {
                        provider: "gemini",
                        env_var: "GEMINI_API_KEY",
                    });
                }
            }
            ProviderKind::Local => {
                if !is_http_url(&self.local.base_url) {
                    problems.push(ConfigError::InvalidValue {
                        key: "local.base_url".to_string(),
                        value: self.local.base_url.clone(),
                    });
                }
            }
        }
        if self.server.keepalive_interval_secs == 0 {
            problems.push(ConfigError::InvalidValue {
                key: "server.keepalive_interval_secs".to_string(),
                value: "0".to_string(),
            });
        }
        problems
    }

    /// Keepalive ping interval (never zero)
    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.server.keepalive_interval_secs.max(1))
    }

    /// Backend HTTP timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Default config file location (`$XDG_CONFIG_HOME/thera/config.toml`)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("thera").join("config.toml"))
}

/// Load configuration from a file (if any) and the environment
///
/// An explicit `path` must exist. Without one, the default location is used
/// when present and silently skipped otherwise.
pub fn load_config(path: Option<&Path>) -> Result<ConductorConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_config_from_path(path)?,
        None => match default_config_path() {
            Some(default) if default.exists() => load_config_from_path(&default)?,
            _ => ConductorConfig::default(),
        },
    };
    config.apply_env()?;
    Ok(config)
}

/// Load configuration from a TOML file on top of the defaults
pub fn load_config_from_path(path: &Path) -> Result<ConductorConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(key = %key, value = %raw, "Ignoring unparseable setting"),
        }
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ConductorConfig::default();
        assert_eq!(config.provider, ProviderKind::Cloud);
        assert_eq!(config.memory_cap, 20);
        assert_eq!(config.keepalive_interval(), Duration::from_secs(30));
        assert_eq!(config.local.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("cloud".parse::<ProviderKind>().unwrap(), ProviderKind::Cloud);
        assert_eq!("Gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Cloud);
        assert_eq!(" LOCAL ".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert_eq!("ollama".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert!(matches!(
            "openai".parse::<ProviderKind>(),
            Err(ConfigError::InvalidProvider(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConductorConfig::default();
        config
            .apply_env_from(lookup_from(&[
                ("THERA_PROVIDER", "ollama"),
                ("OLLAMA_MODEL", "mistral"),
                ("THERA_MEMORY_CAP", "10"),
                ("THERA_KEEPALIVE_SECS", "5"),
            ]))
            .unwrap();

        assert_eq!(config.provider, ProviderKind::Local);
        assert_eq!(config.local.model, "mistral");
        assert_eq!(config.memory_cap, 10);
        assert_eq!(config.keepalive_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_bad_number_keeps_previous_value() {
        let mut config = ConductorConfig::default();
        config
            .apply_env_from(lookup_from(&[("THERA_MEMORY_CAP", "lots")]))
            .unwrap();
        assert_eq!(config.memory_cap, 20);
    }

    #[test]
    fn test_bad_provider_is_error() {
        let mut config = ConductorConfig::default();
        let result = config.apply_env_from(lookup_from(&[("THERA_PROVIDER", "carrier-pigeon")]));
        assert!(matches!(result, Err(ConfigError::InvalidProvider(_))));
    }

    #[test]
    fn test_missing_credential_only_for_selected_provider() {
        let mut config = ConductorConfig::default();
        let problems = config.validate();
        assert_eq!(problems.len(), 1);
        assert!(matches!(problems[0], ConfigError::MissingCredential { .. }));

        config.provider = ProviderKind::Local;
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_blank_api_key_counts_as_missing() {
        let mut config = ConductorConfig::default();
        config.cloud.api_key = Some("   ".to_string());
        assert!(config.cloud.api_key().is_none());
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn test_api_key_redacted_in_debug() {
        let mut config = ConductorConfig::default();
        config.cloud.api_key = Some("super-secret".to_string());
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_from_toml() {
        let config = ConductorConfig::from_toml_str(
            r#"
provider = "local"
memory_cap = 8

[local]
model = "phi3"

[server]
keepalive_interval_secs = 15
"#,
        )
        .unwrap();

        assert_eq!(config.provider, ProviderKind::Local);
        assert_eq!(config.memory_cap, 8);
        assert_eq!(config.local.model, "phi3");
        assert_eq!(config.local.base_url, "http://localhost:11434");
        assert_eq!(config.server.keepalive_interval_secs, 15);
        assert_eq!(config.server.bind_address, "127.0.0.1:8787");
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "provider = \"gemini\"\n[cloud]\napi_key = \"k\"").unwrap();

        let config = load_config_from_path(file.path()).unwrap();
        assert_eq!(config.provider, ProviderKind::Cloud);
        assert_eq!(config.cloud.api_key(), Some("k"));
    }

    #[test]
    fn test_load_missing_path_is_error() {
        let result = load_config_from_path(Path::new("/nonexistent/thera.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = ConductorConfig::default();
        config
            .apply_overrides(&ConfigOverrides {
                provider: Some("local".to_string()),
                bind_address: Some("0.0.0.0:9000".to_string()),
                personas_dir: None,
            })
            .unwrap();
        assert_eq!(config.provider, ProviderKind::Local);
        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
    }
}
