//! Client configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detection::DEFAULT_CONFIDENCE_THRESHOLD;

/// How remote-feed mode acquires frames and detections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStrategy {
    /// Poll `/latest_image` and `/latest_prediction`
    Poll,
    /// Socket.IO event stream
    Socket,
}

/// Where auto-added products get their price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingPolicy {
    Catalog,
    /// Random whole price in 1..=100, for demos only
    Placeholder,
}

/// Complete client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Base URL of the recognition/streaming service
    pub api_url: String,

    pub remote_strategy: RemoteStrategy,

    /// Image poll interval (milliseconds, 200..=1000)
    pub image_interval_ms: u64,

    /// Prediction poll interval (milliseconds)
    pub prediction_interval_ms: u64,

    /// Local capture interval (milliseconds)
    pub capture_interval_ms: u64,

    /// Minimum confidence for an auto-add
    pub confidence_threshold: f64,

    /// Captured frames wider than this are downscaled before submission
    pub capture_max_width: u32,

    /// Snapshot URL of the local camera
    pub camera_url: Option<String>,

    /// Products catalog (JSON)
    pub catalog_path: PathBuf,

    pub pricing: PricingPolicy,

    /// Directory for persisted client state
    pub state_dir: PathBuf,

    /// Socket reconnection attempts before giving up
    pub reconnect_attempts: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            api_url: "http://localhost:5000".to_string(),
            remote_strategy: RemoteStrategy::Poll,
            image_interval_ms: 500,
            prediction_interval_ms: 1000,
            capture_interval_ms: 1000,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            capture_max_width: 640,
            camera_url: None,
            catalog_path: PathBuf::from("data/products.json"),
            pricing: PricingPolicy::Catalog,
            state_dir: PathBuf::from(".smartcart"),
            reconnect_attempts: 5,
        }
    }
}

impl FeedConfig {
    /// Load configuration from a JSON file, then apply environment overrides
    ///
    /// # Arguments
    /// * `path` - Optional path to a JSON config file; defaults are used when None
    ///
    /// # Returns
    /// * `Result<FeedConfig, Box<dyn std::error::Error>>` - The normalized configuration
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = match path {
            Some(path) => {
                let contents = fs::read_to_string(path)?;
                serde_json::from_str(&contents)?
            }
            None => FeedConfig::default(),
        };

        Ok(config.with_overrides(|key| std::env::var(key).ok()).normalized())
    }

    /// Apply `SMARTCART_*` overrides from a variable lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SMARTCART_API_URL") {
            self.api_url = url;
        }
        if let Some(strategy) = lookup("SMARTCART_STRATEGY") {
            match strategy.to_lowercase().as_str() {
                "poll" => self.remote_strategy = RemoteStrategy::Poll,
                "socket" => self.remote_strategy = RemoteStrategy::Socket,
                other => log::warn!("Ignoring unknown SMARTCART_STRATEGY {:?}", other),
            }
        }
        if let Some(url) = lookup("SMARTCART_CAMERA_URL") {
            self.camera_url = Some(url);
        }
        if let Some(path) = lookup("SMARTCART_CATALOG") {
            self.catalog_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("SMARTCART_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
        self
    }

    /// Clamp values into their working ranges
    pub fn normalized(mut self) -> Self {
        self.api_url = self.api_url.trim_end_matches('/').to_string();
        self.image_interval_ms = self.image_interval_ms.clamp(200, 1000);
        self.prediction_interval_ms = self.prediction_interval_ms.max(100);
        self.capture_interval_ms = self.capture_interval_ms.max(100);
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            self.confidence_threshold = DEFAULT_CONFIDENCE_THRESHOLD;
        }
        self.capture_max_width = self.capture_max_width.max(32);
        self
    }

    pub fn image_interval(&self) -> Duration {
        Duration::from_millis(self.image_interval_ms)
    }

    pub fn prediction_interval(&self) -> Duration {
        Duration::from_millis(self.prediction_interval_ms)
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }
}
