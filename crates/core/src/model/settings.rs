use thiserror::Error;
use url::Url;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Connection settings for the chat-completions generation backend.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatBackendSettings {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    temperature: f32,
}

#[derive(Clone, Debug, Default)]
pub struct ChatBackendSettingsDraft {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("invalid base URL")]
    InvalidBaseUrl,

    #[error("temperature must be within 0.0..=2.0, got {0}")]
    InvalidTemperature(f32),
}

impl ChatBackendSettingsDraft {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and normalize the draft.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the base URL is present but invalid or the
    /// temperature is out of range.
    pub fn validate(self) -> Result<ChatBackendSettings, SettingsError> {
        let base_url = normalize_optional(self.base_url);
        let api_key = normalize_optional(self.api_key);
        let model = normalize_optional(self.model);

        if let Some(url) = base_url.as_ref() {
            if Url::parse(url).is_err() {
                return Err(SettingsError::InvalidBaseUrl);
            }
        }

        let temperature = self.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(SettingsError::InvalidTemperature(temperature));
        }

        Ok(ChatBackendSettings {
            base_url,
            api_key,
            model,
            temperature,
        })
    }
}

impl ChatBackendSettings {
    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    #[must_use]
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Generation is attempted only when some backend has been configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.base_url.is_some() || self.api_key.is_some()
    }
}

impl Default for ChatBackendSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: None,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_normalize_to_none() {
        let settings = ChatBackendSettingsDraft {
            base_url: Some("  ".into()),
            api_key: Some(String::new()),
            model: Some(" gpt-4o-mini ".into()),
            temperature: None,
        }
        .validate()
        .unwrap();
        assert_eq!(settings.base_url(), None);
        assert_eq!(settings.model(), Some("gpt-4o-mini"));
        assert!(!settings.is_configured());
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = ChatBackendSettingsDraft {
            base_url: Some("not a url".into()),
            ..ChatBackendSettingsDraft::new()
        }
        .validate()
        .unwrap_err();
        assert_eq!(err, SettingsError::InvalidBaseUrl);
    }
}
