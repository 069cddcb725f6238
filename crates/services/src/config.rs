//! Engine configuration.
//!
//! Values are resolved with the precedence environment > config file >
//! defaults. Every section is optional in the file.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use tutor_core::model::{
    ChatBackendSettings, ChatBackendSettingsDraft, Curriculum, CurriculumDraft,
};

use crate::error::ConfigError;

/// Largest question count a single quiz may request.
pub const MAX_QUESTIONS_PER_LESSON: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub database_url: String,
    /// Percentage a session score must reach to complete the lesson.
    pub pass_threshold: u8,
    pub questions_per_lesson: usize,
    pub generation: GenerationConfig,
    pub paths: PathsConfig,
    pub ai: AiConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://tutor.sqlite3?mode=rwc".to_string(),
            pass_threshold: 67,
            questions_per_lesson: 3,
            generation: GenerationConfig::default(),
            paths: PathsConfig::default(),
            ai: AiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Ceiling for one tier.
    pub tier_timeout_secs: u64,
    /// Ceiling for the whole chain before falling through to placeholders.
    pub total_timeout_secs: u64,
    /// Knowledge snippets handed to the generation backend.
    pub top_k: usize,
    pub shuffle_static_bank: bool,
    pub shuffle_seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            tier_timeout_secs: 15,
            total_timeout_secs: 20,
            top_k: 5,
            shuffle_static_bank: false,
            shuffle_seed: 7,
        }
    }
}

impl GenerationConfig {
    #[must_use]
    pub fn tier_timeout(&self) -> Duration {
        Duration::from_secs(self.tier_timeout_secs)
    }

    #[must_use]
    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub curriculum: PathBuf,
    pub question_bank: PathBuf,
    pub knowledge_base: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            curriculum: PathBuf::from("data/curriculum.toml"),
            question_bank: PathBuf::from("data/question_bank.json"),
            knowledge_base: PathBuf::from("data/knowledge_base.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

impl AiConfig {
    /// Validate into backend settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Settings` for an invalid URL or temperature.
    pub fn settings(&self) -> Result<ChatBackendSettings, ConfigError> {
        Ok(ChatBackendSettingsDraft {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
        }
        .validate()?)
    }
}

impl EngineConfig {
    /// Load from an optional file, then apply environment overrides and
    /// validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, or a final
    /// value is out of range.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or is not valid TOML.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read(path)?;
        Self::from_toml(&content, path)
    }

    fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Apply `TUTOR_*` overrides. Unparseable numbers are ignored with a
    /// warning and the previous value is kept.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("TUTOR_DB_URL") {
            self.database_url = val;
        }
        if let Some(val) = lookup("TUTOR_PASS_THRESHOLD") {
            match val.trim().parse::<u8>() {
                Ok(n) => self.pass_threshold = n,
                Err(_) => warn!(
                    value = %val,
                    current = self.pass_threshold,
                    "ignoring invalid TUTOR_PASS_THRESHOLD"
                ),
            }
        }
        if let Some(val) = lookup("TUTOR_QUESTIONS_PER_LESSON") {
            match val.trim().parse::<usize>() {
                Ok(n) => self.questions_per_lesson = n,
                Err(_) => warn!(
                    value = %val,
                    current = self.questions_per_lesson,
                    "ignoring invalid TUTOR_QUESTIONS_PER_LESSON"
                ),
            }
        }
        if let Some(val) = lookup("TUTOR_AI_BASE_URL") {
            self.ai.base_url = Some(val);
        }
        if let Some(val) = lookup("TUTOR_AI_API_KEY") {
            self.ai.api_key = Some(val);
        }
        if let Some(val) = lookup("TUTOR_AI_MODEL") {
            self.ai.model = Some(val);
        }
    }

    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for out-of-range values and
    /// `ConfigError::Settings` for invalid backend settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.pass_threshold) {
            return Err(ConfigError::Invalid {
                key: "pass_threshold",
                message: format!("must be within 1..=100, got {}", self.pass_threshold),
            });
        }
        if !(1..=MAX_QUESTIONS_PER_LESSON).contains(&self.questions_per_lesson) {
            return Err(ConfigError::Invalid {
                key: "questions_per_lesson",
                message: format!(
                    "must be within 1..={MAX_QUESTIONS_PER_LESSON}, got {}",
                    self.questions_per_lesson
                ),
            });
        }
        if self.generation.total_timeout_secs == 0 || self.generation.tier_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "generation",
                message: "timeouts must be positive".into(),
            });
        }
        if self.generation.top_k == 0 {
            return Err(ConfigError::Invalid {
                key: "generation.top_k",
                message: "must be positive".into(),
            });
        }
        self.ai.settings()?;
        Ok(())
    }
}

pub(crate) fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Load and validate the curriculum TOML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file is missing, malformed, or fails
/// curriculum validation.
pub fn load_curriculum(path: &Path) -> Result<Curriculum, ConfigError> {
    parse_curriculum(&read(path)?, path)
}

/// # Errors
///
/// See [`load_curriculum`].
pub fn parse_curriculum(content: &str, path: &Path) -> Result<Curriculum, ConfigError> {
    let draft: CurriculumDraft = toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(draft.validate()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn file_values_override_defaults_and_missing_sections_default() {
        let config = EngineConfig::from_toml(
            r#"
                pass_threshold = 80

                [generation]
                top_k = 3
            "#,
            Path::new("tutor.toml"),
        )
        .unwrap();
        assert_eq!(config.pass_threshold, 80);
        assert_eq!(config.generation.top_k, 3);
        assert_eq!(config.generation.tier_timeout_secs, 15);
        assert_eq!(config.questions_per_lesson, 3);
        assert_eq!(config.paths, PathsConfig::default());
    }

    #[test]
    fn environment_wins_over_file() {
        let mut config = EngineConfig {
            pass_threshold: 80,
            ..EngineConfig::default()
        };
        config.apply_overrides(lookup(&[
            ("TUTOR_PASS_THRESHOLD", "70"),
            ("TUTOR_AI_MODEL", "gpt-4o-mini"),
        ]));
        assert_eq!(config.pass_threshold, 70);
        assert_eq!(config.ai.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn unparseable_override_keeps_previous_value() {
        let mut config = EngineConfig::default();
        config.apply_overrides(lookup(&[("TUTOR_QUESTIONS_PER_LESSON", "many")]));
        assert_eq!(config.questions_per_lesson, 3);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let config = EngineConfig {
            questions_per_lesson: 11,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "questions_per_lesson",
                ..
            })
        ));

        let config = EngineConfig {
            pass_threshold: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.ai.base_url = Some("not a url".into());
        assert!(matches!(config.validate(), Err(ConfigError::Settings(_))));
    }

    #[test]
    fn curriculum_toml_is_validated() {
        let curriculum = parse_curriculum(
            r#"
                [[topics]]
                id = "basics"
                title = "Basics"

                [[topics.lessons]]
                id = 1
                title = "Definitions"
                keywords = ["risk", "probability"]

                [[topics.lessons]]
                id = 2
                title = "Sources"
            "#,
            Path::new("curriculum.toml"),
        )
        .unwrap();
        assert_eq!(curriculum.total_lessons(), 2);

        let err = parse_curriculum(
            r#"
                [[topics]]
                id = "basics"
                title = "Basics"
                lessons = []
            "#,
            Path::new("curriculum.toml"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Curriculum(_)));
    }
}
