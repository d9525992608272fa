use crate::error::{Error, Result};
use log::debug;

/// Tunables of the weight computation. Passed into the engine by value;
/// nothing here is global.
#[derive(Debug, Clone)]
pub struct AdvancedParameters {
    /// Share of traffic reserved for exploration, in percent.
    pub exploration_traffic_percentage: f64,
}

impl Default for AdvancedParameters {
    fn default() -> Self {
        Self {
            exploration_traffic_percentage: 5.0,
        }
    }
}

impl AdvancedParameters {
    /// Read parameters from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut params = Self::default();
        if let Ok(raw) = std::env::var("EXPLORATION_TRAFFIC_PERCENTAGE") {
            let value: f64 = raw.parse().map_err(|_| {
                Error::ConfigError(format!(
                    "EXPLORATION_TRAFFIC_PERCENTAGE is not a number: {raw}"
                ))
            })?;
            if !(0.0..=100.0).contains(&value) {
                return Err(Error::ConfigError(format!(
                    "EXPLORATION_TRAFFIC_PERCENTAGE out of range [0, 100]: {value}"
                )));
            }
            params.exploration_traffic_percentage = value;
        }
        debug!("advanced parameters: {params:?}");
        Ok(params)
    }
}
