//! Provider Router
//!
//! Holds the process-wide provider selection and the one backend it names.
//!
//! The selection is fixed at construction. The matching backend client is
//! built on first use and cached for the rest of the process; the other
//! backend's constructor (and its credential checks) never runs.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::backend::{GeminiBackend, LlmBackend, OllamaBackend, ProviderError, SamplingConfig};
use crate::config::{CloudSettings, ConductorConfig, ConfigError, LocalSettings, ProviderKind};
use crate::memory::Turn;

/// The backend actually in use
#[derive(Debug)]
pub enum ActiveBackend {
    /// Gemini cloud API
    Cloud(GeminiBackend),
    /// Ollama local server
    Local(OllamaBackend),
}

impl ActiveBackend {
    fn as_backend(&self) -> &dyn LlmBackend {
        match self {
            Self::Cloud(backend) => backend,
            Self::Local(backend) => backend,
        }
    }
}

/// Routes generation calls to the selected backend
pub struct ProviderRouter {
    kind: ProviderKind,
    cloud: CloudSettings,
    local: LocalSettings,
    timeout: Duration,
    active: OnceCell<ActiveBackend>,
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("kind", &self.kind)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl ProviderRouter {
    /// Create a router from configuration
    ///
    /// Never fails: a broken backend configuration surfaces on the first
    /// generation call instead.
    #[must_use]
    pub fn new(config: &ConductorConfig) -> Self {
        Self {
            kind: config.provider,
            cloud: config.cloud.clone(),
            local: config.local.clone(),
            timeout: config.request_timeout(),
            active: OnceCell::new(),
        }
    }

    /// Selected provider
    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Whether the selected backend has been built yet
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.active.initialized()
    }

    fn build(&self) -> Result<ActiveBackend, ConfigError> {
        let backend = match self.kind {
            ProviderKind::Cloud => {
                ActiveBackend::Cloud(GeminiBackend::from_settings(&self.cloud, self.timeout)?)
            }
            ProviderKind::Local => {
                ActiveBackend::Local(OllamaBackend::from_settings(&self.local, self.timeout)?)
            }
        };
        info!(provider = %self.kind, "Backend initialized");
        Ok(backend)
    }

    /// Get the selected backend, building it on first use
    pub async fn backend(&self) -> Result<&ActiveBackend, ProviderError> {
        self.active
            .get_or_try_init(|| async { self.build() })
            .await
            .map_err(|e| {
                warn!(provider = %self.kind, error = %e, "Backend initialization failed");
                config_to_provider_error(&e)
            })
    }
}

fn config_to_provider_error(e: &ConfigError) -> ProviderError {
    match e {
        ConfigError::MissingCredential { env_var, .. } => ProviderError::Auth(format!(
            "No API key configured for the cloud model. Set {env_var} on the server and restart it."
        )),
        other => ProviderError::Unknown(other.to_string()),
    }
}

#[async_trait]
impl LlmBackend for ProviderRouter {
    fn name(&self) -> &str {
        self.kind.display_name()
    }

    fn default_sampling(&self) -> SamplingConfig {
        match self.kind {
            ProviderKind::Cloud => SamplingConfig::cloud_default(),
            ProviderKind::Local => SamplingConfig::local_default(),
        }
    }

    async fn health_check(&self) -> bool {
        match self.backend().await {
            Ok(active) => active.as_backend().health_check().await,
            Err(_) => false,
        }
    }

    async fn generate(
        &self,
        system_prompt: &str,
        turns: &[Turn],
        sampling: &SamplingConfig,
    ) -> Result<String, ProviderError> {
        let active = self.backend().await?;
        active
            .as_backend()
            .generate(system_prompt, turns, sampling)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ProviderErrorKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_missing_key_is_auth_error_at_generate_time() {
        let config = ConductorConfig::default();
        let router = ProviderRouter::new(&config);
        assert_eq!(router.name(), "gemini");
        assert!(!router.is_initialized());

        let err = router
            .generate("sys", &[Turn::user("hi")], &router.default_sampling())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::Auth);
        assert!(err.user_message().contains("GEMINI_API_KEY"));
        assert!(!router.is_initialized());
    }

    #[tokio::test]
    async fn test_local_selection_ignores_cloud_settings() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3",
                "message": {"role": "assistant", "content": "Hi there."},
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = ConductorConfig::default();
        config.provider = ProviderKind::Local;
        config.local.base_url = server.uri();
        config.cloud.base_url = "not a url".to_string();

        let router = ProviderRouter::new(&config);
        assert_eq!(router.default_sampling(), SamplingConfig::local_default());

        let reply = tokio_test::assert_ok!(
            router
                .generate("sys", &[Turn::user("hi")], &router.default_sampling())
                .await
        );
        assert_eq!(reply, "Hi there.");
        assert!(matches!(router.backend().await, Ok(ActiveBackend::Local(_))));
    }
}
