use std::path::Path;

use hmdlink_common::config::{env_parse, env_string, load_json};
use openxr::sys;
use serde::{Deserialize, Serialize};

use crate::error::XrResult;

pub const ENV_APP_NAME: &str = "HMDLINK_APP_NAME";
pub const ENV_ENGINE_NAME: &str = "HMDLINK_ENGINE_NAME";
pub const ENV_IMAGE_TIMEOUT_MS: &str = "HMDLINK_IMAGE_TIMEOUT_MS";
pub const ENV_FRAME_LOG_INTERVAL: &str = "HMDLINK_FRAME_LOG_INTERVAL";

/// Host-tunable settings of a VR session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XrConfig {
    pub application_name: String,
    pub application_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
    /// Bound on the swapchain image wait; `None` waits as long as the runtime needs.
    pub image_wait_timeout_ms: Option<u64>,
    /// Log a frame summary every N submitted frames, 0 disables it.
    pub frame_log_interval: u64,
}

impl Default for XrConfig {
    fn default() -> Self {
        Self {
            application_name: "hmdlink".to_string(),
            application_version: 1,
            engine_name: "hmdlink".to_string(),
            engine_version: 1,
            image_wait_timeout_ms: None,
            frame_log_interval: 600,
        }
    }
}

impl XrConfig {
    /// Defaults, overlaid by the JSON file at `path` if given, overlaid by the
    /// environment.
    pub fn load(path: Option<&Path>) -> XrResult<Self> {
        let mut config = match path {
            Some(path) => load_json(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> hmdlink_common::Result<()> {
        if let Some(name) = env_string(ENV_APP_NAME) {
            self.application_name = name;
        }
        if let Some(name) = env_string(ENV_ENGINE_NAME) {
            self.engine_name = name;
        }
        if let Some(ms) = env_parse::<u64>(ENV_IMAGE_TIMEOUT_MS)? {
            self.image_wait_timeout_ms = Some(ms);
        }
        if let Some(interval) = env_parse::<u64>(ENV_FRAME_LOG_INTERVAL)? {
            self.frame_log_interval = interval;
        }
        Ok(())
    }

    /// OpenXR API version requested at instance creation.
    pub fn api_version(&self) -> u64 {
        openxr::Version::new(1, 0, 0).into_raw()
    }

    pub fn image_wait_timeout(&self) -> sys::Duration {
        match self.image_wait_timeout_ms {
            Some(ms) => sys::Duration::from_nanos(ms.saturating_mul(1_000_000).min(i64::MAX as u64) as i64),
            None => sys::Duration::INFINITE,
        }
    }
}
