//! Configuration types for the garage controller
//!
//! Process-level settings only. Templates, reminder intervals and alert
//! targets live in configuration entities inside the store.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default tick period in milliseconds
pub const DEFAULT_TICK_RATE_MS: u64 = 100;

/// Alert channels enabled for this process
///
/// Written alongside every dispatched alert so targets know which channels
/// to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertChannels {
    /// Speak the alert
    pub tts: bool,
    /// Email the alert
    pub email: bool,
}

impl AlertChannels {
    /// Parse the `ALERTS` setting
    ///
    /// The value is substring-checked for the tokens `TTS` and `EMAIL`, so
    /// `"TTS,EMAIL"`, `"TTS EMAIL"` and `"EMAIL;TTS"` are all equivalent.
    pub fn from_alerts(value: &str) -> Self {
        Self {
            tts: value.contains("TTS"),
            email: value.contains("EMAIL"),
        }
    }
}

/// Main controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Application identity written with every alert
    pub application_name: String,

    /// Alert channels enabled for this process
    #[serde(default)]
    pub alerts: AlertChannels,

    /// Period of the `do_work` tick
    #[serde(default = "default_tick_rate_ms")]
    pub tick_rate_ms: u64,

    /// Capacity of the monitoring event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_tick_rate_ms() -> u64 {
    DEFAULT_TICK_RATE_MS
}

fn default_event_channel_capacity() -> usize {
    1000
}

impl ControllerConfig {
    /// Create a new configuration with defaults
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            alerts: AlertChannels::default(),
            tick_rate_ms: default_tick_rate_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Builder-style alert channel assignment
    pub fn with_alerts(mut self, alerts: AlertChannels) -> Self {
        self.alerts = alerts;
        self
    }

    /// Builder-style tick rate assignment
    pub fn with_tick_rate_ms(mut self, tick_rate_ms: u64) -> Self {
        self.tick_rate_ms = tick_rate_ms;
        self
    }

    /// Tick period as a duration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.application_name.trim().is_empty() {
            return Err(crate::Error::config("Application name cannot be empty"));
        }
        if self.tick_rate_ms == 0 {
            return Err(crate::Error::config("Tick rate must be > 0 ms"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new("garage")
    }
}
