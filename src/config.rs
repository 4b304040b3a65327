//! Configuration.
//!
//! Every setting has a default, so a config file is optional. Files may be
//! TOML or JSON:
//!
//! ```toml
//! [classifier]
//! url = "http://localhost:8000/ner"
//! timeout_secs = 30
//!
//! [policy]
//! categories = ["EMAIL", "TELEPHONENUM"]
//! min_score = 0.85
//!
//! [overlay]
//! padding = 2.0
//!
//! [bridge]
//! ready_timeout_secs = 30
//! request_timeout_secs = 120
//! worker_command = ["photo-redact", "worker"]
//! ```

use std::time::Duration;

use crate::{
    async_utils::io::read_json_or_toml, bridge::BridgeTimeouts, geometry::DEFAULT_PADDING,
    prelude::*, sensitivity::SensitivityPolicy,
};

/// Environment variable that overrides `classifier.url`.
pub const NER_API_URL_ENV: &str = "NER_API_URL";

/// Top-level configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedactConfig {
    pub classifier: ClassifierConfig,
    pub policy: SensitivityPolicy,
    pub overlay: OverlayConfig,
    pub bridge: BridgeConfig,
}

/// Where and how to call the entity classifier.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    /// The NER endpoint.
    pub url: String,

    /// Per-word timeout, in seconds.
    pub timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/ner".to_owned(),
            timeout_secs: 30,
        }
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How overlays are drawn.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OverlayConfig {
    /// Extra space around each word, in display pixels.
    pub padding: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            padding: DEFAULT_PADDING,
        }
    }
}

/// How to start and talk to the OCR worker.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub ready_timeout_secs: u64,
    pub request_timeout_secs: u64,

    /// Program and arguments for the worker. If empty, we run our own
    /// `worker` subcommand.
    pub worker_command: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: 30,
            request_timeout_secs: 120,
            worker_command: vec![],
        }
    }
}

impl BridgeConfig {
    pub fn timeouts(&self) -> BridgeTimeouts {
        BridgeTimeouts {
            ready: Duration::from_secs(self.ready_timeout_secs),
            request: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

impl RedactConfig {
    /// Load configuration from `path` if given, otherwise use defaults. Then
    /// apply environment overrides and validate.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => read_json_or_toml::<Self>(path).await?,
            None => Self::default(),
        };
        if let Ok(url) = std::env::var(NER_API_URL_ENV) {
            debug!("Using {} from environment", NER_API_URL_ENV);
            config.classifier.url = url;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that can't work.
    pub fn validate(&self) -> Result<()> {
        self.policy.validate().context("invalid [policy]")?;
        if !(self.overlay.padding.is_finite() && self.overlay.padding >= 0.0) {
            return Err(anyhow!(
                "overlay padding must be a non-negative number, not {}",
                self.overlay.padding
            ));
        }
        if self.classifier.url.trim().is_empty() {
            return Err(anyhow!("classifier url must not be empty"));
        }
        Ok(())
    }
}
