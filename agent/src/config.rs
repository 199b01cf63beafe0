//! Agent configuration options.
//!
//! We use `serde` to parse these options from the TOML config file,
//! and to write the default configuration to the TOML config file,
//! therefore the structs derive [`serde::Deserialize`] and [`serde::Serialize`].

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use weft::controller::ControllerOptions;

/// Options of the agent. Every option has a default value.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// File that contains the pipeline, in the weft language.
    ///
    /// A relative path is relative to the working directory of the agent.
    pub pipeline_file: PathBuf,

    /// How often to check the pipeline file for changes.
    ///
    /// Zero disables the polling, the file is then only reloaded on SIGHUP.
    #[serde(with = "humantime_serde")]
    pub reload_interval: Duration,

    /// Maximum time that the constructor or the update of a component may take.
    #[serde(with = "humantime_serde")]
    pub evaluation_timeout: Duration,

    /// Maximum time that a component may take to stop.
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,

    /// Maximum time to wait for all the components to stop, when the agent shuts down.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let controller = ControllerOptions::default();
        Self {
            pipeline_file: PathBuf::from("pipeline.weft"),
            reload_interval: Duration::from_secs(5),
            evaluation_timeout: controller.evaluation_timeout,
            stop_timeout: controller.stop_timeout,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl AgentConfig {
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            evaluation_timeout: self.evaluation_timeout,
            stop_timeout: self.stop_timeout,
        }
    }

    pub fn reload_interval(&self) -> Option<Duration> {
        Some(self.reload_interval).filter(|d| !d.is_zero())
    }
}
