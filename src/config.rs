//! Typed stream configuration
//!
//! One [`StreamSettings`] entry per instrument stream, loaded from JSON.
//! Everything is checked once by [`LakeConfig::validate`] so the ingestion
//! path never has to second-guess a width or a window.

use crate::average::{AveragingParams, DEFAULT_BUCKET_WIDTH_SEC, DEFAULT_ROUNDING_BASE_SEC};
use crate::error::StreamError;
use crate::merge::HeaderPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

fn default_width() -> f64 {
    DEFAULT_BUCKET_WIDTH_SEC
}

fn default_base() -> f64 {
    DEFAULT_ROUNDING_BASE_SEC
}

/// Configuration for every stream of a data lake
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LakeConfig {
    pub streams: Vec<StreamSettings>,
}

/// What an instrument produces
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstrumentKind {
    /// One row per named channel
    #[default]
    General,
    /// Size-resolved instrument; its bin block goes to a second stream
    Sizer { bins_stream: String },
}

/// Averaging settings for one stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AveragingSettings {
    #[serde(default = "default_width")]
    pub bucket_width_sec: f64,
    #[serde(default = "default_base")]
    pub rounding_base_sec: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_end: Option<f64>,
}

impl Default for AveragingSettings {
    fn default() -> Self {
        Self {
            bucket_width_sec: DEFAULT_BUCKET_WIDTH_SEC,
            rounding_base_sec: DEFAULT_ROUNDING_BASE_SEC,
            window_start: None,
            window_end: None,
        }
    }
}

impl From<AveragingSettings> for AveragingParams {
    fn from(settings: AveragingSettings) -> Self {
        AveragingParams {
            bucket_width_sec: settings.bucket_width_sec,
            rounding_base_sec: settings.rounding_base_sec,
            window_start: settings.window_start,
            window_end: settings.window_end,
        }
    }
}

/// Settings for one instrument stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    pub name: String,
    #[serde(default)]
    pub kind: InstrumentKind,
    /// Expected channel names; empty means "take them from the data"
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub averaging: AveragingSettings,
    #[serde(default)]
    pub header_policy: HeaderPolicy,
    /// Flag channels marking zero/calibration periods to drop
    #[serde(default)]
    pub zero_flag_channels: Vec<String>,
}

impl StreamSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: InstrumentKind::General,
            channels: Vec::new(),
            averaging: AveragingSettings::default(),
            header_policy: HeaderPolicy::Strict,
            zero_flag_channels: Vec::new(),
        }
    }

    pub fn params(&self) -> AveragingParams {
        self.averaging.into()
    }

    /// Name of the bin stream for sizers
    pub fn bins_stream(&self) -> Option<&str> {
        match &self.kind {
            InstrumentKind::Sizer { bins_stream } => Some(bins_stream.as_str()),
            InstrumentKind::General => None,
        }
    }

    fn validate(&self) -> Result<(), StreamError> {
        if self.name.trim().is_empty() {
            return Err(StreamError::Config("stream name must not be empty".to_string()));
        }
        self.params()
            .validate()
            .map_err(|e| StreamError::Config(format!("stream '{}': {e}", self.name)))?;

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.as_str()) {
                return Err(StreamError::Config(format!(
                    "stream '{}': duplicate channel '{channel}'",
                    self.name
                )));
            }
        }
        if !self.channels.is_empty() {
            if let Some(flag) = self.zero_flag_channels.iter().find(|f| !seen.contains(f.as_str())) {
                return Err(StreamError::Config(format!(
                    "stream '{}': zero flag channel '{flag}' is not one of its channels",
                    self.name
                )));
            }
        }
        if let Some(bins) = self.bins_stream() {
            if bins.trim().is_empty() || bins == self.name {
                return Err(StreamError::Config(format!(
                    "stream '{}': bins stream must be a distinct, non-empty name",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

impl LakeConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self, StreamError> {
        let config: LakeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every stream and that all stream names (bin streams included) are unique.
    pub fn validate(&self) -> Result<(), StreamError> {
        let mut names = HashSet::new();
        for settings in &self.streams {
            settings.validate()?;
            for name in std::iter::once(settings.name.as_str()).chain(settings.bins_stream()) {
                if !names.insert(name) {
                    return Err(StreamError::Config(format!("duplicate stream name '{name}'")));
                }
            }
        }
        Ok(())
    }

    pub fn stream(&self, name: &str) -> Option<&StreamSettings> {
        self.streams.iter().find(|s| s.name == name)
    }

    pub fn stream_names(&self) -> Vec<&str> {
        self.streams.iter().map(|s| s.name.as_str()).collect()
    }
}
