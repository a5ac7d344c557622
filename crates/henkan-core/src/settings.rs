//! Global settings loaded from TOML.
//!
//! - `init_custom(toml_content)` installs a custom TOML before the first
//!   `settings()` call
//! - `settings()` returns `&'static Settings` (lazy-init singleton)
//! - Defaults are embedded via `include_str!("default_settings.toml")`

use std::sync::OnceLock;

use serde::Deserialize;

pub const DEFAULT_SETTINGS_TOML: &str = include_str!("default_settings.toml");

static CUSTOM_TOML: OnceLock<String> = OnceLock::new();

/// Set custom TOML before the first `settings()` call.
pub fn init_custom(toml_content: String) -> Result<(), SettingsError> {
    parse_settings_toml(&toml_content)?;
    CUSTOM_TOML
        .set(toml_content)
        .map_err(|_| SettingsError::AlreadyInitialized)
}

/// Get or initialize the global settings singleton.
pub fn settings() -> &'static Settings {
    static INSTANCE: OnceLock<Settings> = OnceLock::new();
    INSTANCE.get_or_init(|| {
        let toml_str = CUSTOM_TOML
            .get()
            .map(|s| s.as_str())
            .unwrap_or(DEFAULT_SETTINGS_TOML);
        parse_settings_toml(toml_str).expect("settings TOML must be valid")
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("settings already initialized")]
    AlreadyInitialized,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub candidates: CandidateSettings,
    pub predictive: PredictiveSettings,
    pub predictive_cost: PredictiveCostSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidateSettings {
    pub max_expand: usize,
    pub realtime_top_size: usize,
    pub single_segment_char_coverage: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictiveSettings {
    pub min_key_len: usize,
    pub suffix_max: usize,
    pub system_min: usize,
    pub system_max: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictiveCostSettings {
    pub default_penalty: i32,
    pub suffix_word_bonus: i32,
    pub unique_noun_penalty: i32,
    pub number_penalty: i32,
}

pub fn parse_settings_toml(toml_str: &str) -> Result<Settings, SettingsError> {
    let s: Settings = toml::from_str(toml_str).map_err(|e| SettingsError::Parse(e.to_string()))?;
    validate(&s)?;
    Ok(s)
}

fn validate(s: &Settings) -> Result<(), SettingsError> {
    if s.candidates.max_expand == 0 {
        return Err(SettingsError::InvalidValue {
            field: "candidates.max_expand".to_string(),
            reason: "must be positive".to_string(),
        });
    }
    if s.predictive.system_min > s.predictive.system_max {
        return Err(SettingsError::InvalidValue {
            field: "predictive.system_min".to_string(),
            reason: "must not exceed predictive.system_max".to_string(),
        });
    }
    Ok(())
}
