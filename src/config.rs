use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::barrier::BarrierTiming;
use crate::error::{Error, Result};

/// Controller settings, read from a json5 file. Every key is optional.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ControllerConfig {
    pub listen_address: String,
    pub barrier_timeout_ms: u64,
    pub barrier_poll_interval_ms: u64,
    pub reply_queue_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> ControllerConfig {
        ControllerConfig {
            listen_address: "0.0.0.0:6653".to_string(),
            barrier_timeout_ms: 5000,
            barrier_poll_interval_ms: 1000,
            reply_queue_capacity: 1024,
        }
    }
}

impl ControllerConfig {
    pub fn from_json5(contents: &str) -> Result<ControllerConfig> {
        let config: ControllerConfig =
            json5::from_str(contents).map_err(|e| Error::Config(format!("unable to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<ControllerConfig> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("unable to read {}: {e}", path.display())))?;
        Self::from_json5(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.barrier_poll_interval_ms == 0 {
            return Err(Error::Config("barrier_poll_interval_ms must be positive".to_string()));
        }
        if self.barrier_timeout_ms == 0 {
            return Err(Error::Config("barrier_timeout_ms must be positive".to_string()));
        }
        if self.reply_queue_capacity == 0 {
            return Err(Error::Config("reply_queue_capacity must be positive".to_string()));
        }
        Ok(())
    }

    pub fn barrier_timing(&self) -> BarrierTiming {
        BarrierTiming {
            timeout: Duration::from_millis(self.barrier_timeout_ms),
            poll_interval: Duration::from_millis(self.barrier_poll_interval_ms),
        }
    }
}
