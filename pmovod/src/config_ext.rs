//! Extension pour lire la configuration VOD depuis pmoconfig
//!
//! ```rust,ignore
//! use pmoconfig::get_config;
//! use pmovod::VodConfigExt;
//!
//! let vod = get_config().get_vod_config()?;
//! println!("Server: {}", vod.server_url);
//! ```

use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::{Number, Value};

use crate::config::{StartPolicy, VodConfig};

const VOD_SECTION: &str = "vod";

/// Typed access to the `vod` section of `pmoconfig::Config`.
pub trait VodConfigExt {
    /// Reads and validates the `vod` section. Missing keys, or a missing
    /// section, fall back to the defaults.
    fn get_vod_config(&self) -> Result<VodConfig>;

    fn set_vod_high_water_mark(&self, high_water_mark: usize) -> Result<()>;

    fn set_vod_start_policy(&self, policy: StartPolicy) -> Result<()>;

    fn set_vod_server_url(&self, url: &str) -> Result<()>;
}

impl VodConfigExt for Config {
    fn get_vod_config(&self) -> Result<VodConfig> {
        let config = match self.get_value(&[VOD_SECTION]) {
            Ok(Value::Mapping(section)) => serde_yaml::from_value(Value::Mapping(section))?,
            _ => VodConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn set_vod_high_water_mark(&self, high_water_mark: usize) -> Result<()> {
        self.set_value(
            &[VOD_SECTION, "high_water_mark"],
            Value::Number(Number::from(high_water_mark)),
        )
    }

    fn set_vod_start_policy(&self, policy: StartPolicy) -> Result<()> {
        self.set_value(&[VOD_SECTION, "start_policy"], serde_yaml::to_value(policy)?)
    }

    fn set_vod_server_url(&self, url: &str) -> Result<()> {
        self.set_value(&[VOD_SECTION, "server_url"], Value::String(url.to_string()))
    }
}
