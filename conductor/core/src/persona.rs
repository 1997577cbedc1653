//! Persona Context
//!
//! Resolves a persona identifier to the system prompt and few-shot examples
//! used to steer generation. Lookups happen fresh for every request so a
//! persona switch takes effect on the very next input.
//!
//! # Providers
//!
//! - [`BuiltinPersonas`]: compiled-in personas (`thera`, `coach`, `mindful`)
//! - [`DirectoryPersonas`]: TOML files on disk, optionally per user, with the
//!   built-ins as a second tier
//!
//! Whatever the provider, [`resolve_persona`] never fails: any lookup error
//! is logged and replaced by [`PersonaContext::embedded_default`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::memory::Turn;

/// Persona used when a session has not chosen one
pub const DEFAULT_PERSONA_ID: &str = "thera";

/// System prompt of the embedded default persona
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Thera, a warm and attentive supportive \
listener. You help people reflect on their thoughts and feelings. Listen carefully, reflect \
back what you hear, and ask gentle open questions. Keep a calm, non-judgmental tone. You are \
not a licensed therapist and you do not diagnose or prescribe; when someone needs professional \
or urgent help, encourage them kindly to reach out to a qualified professional or a crisis line.";

/// System prompt and example exchanges for one persona
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaContext {
    /// Instructions given to the backend ahead of the conversation
    pub system_prompt: String,
    /// Example exchanges prepended to the conversation
    #[serde(default, rename = "examples")]
    pub few_shot_examples: Vec<Turn>,
}

impl PersonaContext {
    /// The last-resort context baked into the binary
    #[must_use]
    pub fn embedded_default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            few_shot_examples: vec![
                Turn::user("I've been feeling really overwhelmed with everything lately."),
                Turn::assistant(
                    "That sounds like a lot to carry. When you say everything, what feels \
                     heaviest for you right now?",
                ),
            ],
        }
    }
}

/// Why a persona lookup failed
#[derive(Debug, thiserror::Error)]
pub enum PersonaLoadError {
    /// No persona with this id exists
    #[error("persona '{0}' not found")]
    NotFound(String),

    /// Persona id contains characters that are not allowed
    #[error("invalid persona id '{0}'")]
    InvalidId(String),

    /// Persona source could not be read
    #[error("failed to read persona '{id}': {source}")]
    Io {
        /// Persona id being loaded
        id: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Persona file exists but does not parse
    #[error("failed to parse persona '{id}': {message}")]
    Parse {
        /// Persona id being loaded
        id: String,
        /// Parser message
        message: String,
    },
}

/// Source of persona contexts
///
/// Implementations may hit disk or a remote store. They are called once per
/// generation request and must not cache across persona switches.
#[async_trait]
pub trait PersonaProvider: Send + Sync {
    /// Look up a persona, optionally scoped to a user
    async fn load_persona(
        &self,
        persona_id: &str,
        user_id: Option<&str>,
    ) -> Result<PersonaContext, PersonaLoadError>;
}

/// Resolve a persona, falling back to the embedded default on any failure
pub async fn resolve_persona(
    provider: &dyn PersonaProvider,
    persona_id: &str,
    user_id: Option<&str>,
) -> PersonaContext {
    match provider.load_persona(persona_id, user_id).await {
        Ok(context) => context,
        Err(e) => {
            warn!(
                persona = %persona_id,
                error = %e,
                "Persona lookup failed, using embedded default"
            );
            PersonaContext::embedded_default()
        }
    }
}

/// Compiled-in personas
#[derive(Clone, Debug)]
pub struct BuiltinPersonas {
    personas: HashMap<String, PersonaContext>,
}

impl Default for BuiltinPersonas {
    fn default() -> Self {
        let mut personas = HashMap::new();
        personas.insert(
            DEFAULT_PERSONA_ID.to_string(),
            PersonaContext::embedded_default(),
        );
        personas.insert(
            "coach".to_string(),
            PersonaContext {
                system_prompt: "You are Thera in coaching mode: an encouraging, practical \
                    companion who helps people turn worries into small, concrete next steps. \
                    Be brief, upbeat, and specific. You are not a therapist; suggest \
                    professional help when a problem is beyond everyday coaching."
                    .to_string(),
                few_shot_examples: vec![
                    Turn::user("I keep putting off studying for my exam."),
                    Turn::assistant(
                        "Let's make it smaller. What's one 15-minute task you could do \
                         today to get started?",
                    ),
                ],
            },
        );
        personas.insert(
            "mindful".to_string(),
            PersonaContext {
                system_prompt: "You are Thera in mindfulness mode: a calm guide who invites \
                    people to notice their breath, body, and surroundings. Speak slowly and \
                    simply, offer short grounding exercises, and never rush. You are not a \
                    therapist and do not give medical advice."
                    .to_string(),
                few_shot_examples: vec![
                    Turn::user("My mind won't stop racing tonight."),
                    Turn::assistant(
                        "Let's pause together. Notice five things you can see around you, \
                         and take one slow breath for each.",
                    ),
                ],
            },
        );
        Self { personas }
    }
}

impl BuiltinPersonas {
    /// Create the built-in set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of all built-in personas, sorted
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.personas.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl PersonaProvider for BuiltinPersonas {
    async fn load_persona(
        &self,
        persona_id: &str,
        _user_id: Option<&str>,
    ) -> Result<PersonaContext, PersonaLoadError> {
        self.personas
            .get(persona_id)
            .cloned()
            .ok_or_else(|| PersonaLoadError::NotFound(persona_id.to_string()))
    }
}

/// Personas stored as TOML files
///
/// Layout:
///
/// ```text
/// <root>/<persona>.toml
/// <root>/users/<user_id>/<persona>.toml   (checked first when a user id is known)
/// ```
///
/// File format:
///
/// ```toml
/// system_prompt = "You are ..."
///
/// [[examples]]
/// role = "user"
/// content = "..."
/// ```
#[derive(Clone, Debug)]
pub struct DirectoryPersonas {
    root: PathBuf,
    builtin: BuiltinPersonas,
}

impl DirectoryPersonas {
    /// Create a provider rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            builtin: BuiltinPersonas::new(),
        }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidate_paths(&self, persona_id: &str, user_id: Option<&str>) -> Vec<PathBuf> {
        let file_name = format!("{persona_id}.toml");
        let mut paths = Vec::with_capacity(2);
        if let Some(user) = user_id.filter(|u| is_valid_id(u)) {
            paths.push(self.root.join("users").join(user).join(&file_name));
        }
        paths.push(self.root.join(file_name));
        paths
    }
}

#[async_trait]
impl PersonaProvider for DirectoryPersonas {
    async fn load_persona(
        &self,
        persona_id: &str,
        user_id: Option<&str>,
    ) -> Result<PersonaContext, PersonaLoadError> {
        if !is_valid_id(persona_id) {
            return Err(PersonaLoadError::InvalidId(persona_id.to_string()));
        }

        for path in self.candidate_paths(persona_id, user_id) {
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) => {
                    return toml::from_str(&raw).map_err(|e| PersonaLoadError::Parse {
                        id: persona_id.to_string(),
                        message: e.to_string(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(PersonaLoadError::Io {
                        id: persona_id.to_string(),
                        source,
                    });
                }
            }
        }

        self.builtin.load_persona(persona_id, user_id).await
    }
}

/// Ids are plain names: no separators, no dots, nothing that walks the filesystem
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
