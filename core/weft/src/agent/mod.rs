//! Helpers for creating a runnable application based on weft, aka a "weft agent".
//!
//! # Minimal Example
//!
//! An agent needs a [registry](crate::schema::Registry) of component kinds, and a
//! configuration to load.
//!
//! ```no_run
//! use std::time::Duration;
//! use weft::agent;
//! use weft::schema::Registry;
//!
//! let registry = Registry::builder().build();
//! let agent = agent::Builder::new(registry).build_and_start().expect("startup failure");
//!
//! agent
//!     .load_blocking("", Duration::from_secs(5))
//!     .expect("invalid configuration");
//!
//! // Run until shutdown (you can use Ctrl+C to initiate shutdown from the terminal)
//! agent.wait_for_shutdown(Duration::MAX).expect("error while running");
//! ```
//!
//! # Configuration Management
//!
//! Use the [`config`] module to manage a TOML file that contains the options of the agent.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use anyhow::{Context, anyhow};
use tokio::{runtime::Runtime, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::controller::{ControlHandle, Controller, ControllerOptions, LoadSummary, SendWaitError};
use crate::schema::Registry;

pub mod config;

/// Agent builder.
pub struct Builder {
    registry: Registry,
    options: ControllerOptions,
    worker_threads: Option<usize>,
    handle_ctrl_c: bool,
}

/// An agent that has been started.
pub struct RunningAgent {
    runtime: Runtime,
    control: ControlHandle,
    controller_task: JoinHandle<()>,
}

impl Builder {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            options: ControllerOptions::default(),
            worker_threads: None,
            handle_ctrl_c: true,
        }
    }

    pub fn options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the number of threads that run the components. Defaults to the number of CPUs.
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = Some(n);
        self
    }

    /// If `true` (the default), Ctrl+C shuts the agent down.
    pub fn handle_ctrl_c(mut self, enabled: bool) -> Self {
        self.handle_ctrl_c = enabled;
        self
    }

    /// Starts the runtime and the controller. No component is running until a configuration is loaded.
    pub fn build_and_start(self) -> anyhow::Result<RunningAgent> {
        let runtime = build_runtime(self.worker_threads).context("failed to build the tokio runtime")?;
        log::debug!("{} component kinds available", self.registry.len());
        if self.registry.is_empty() {
            log::warn!("No component kind has been registered, there may be a problem with your agent implementation.");
        }

        let shutdown = CancellationToken::new();
        let controller = Controller::new(self.registry, self.options);
        let (control, controller_task) = controller.start(shutdown.clone(), runtime.handle());

        if self.handle_ctrl_c {
            runtime.spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => (),
                    res = tokio::signal::ctrl_c() => {
                        match res {
                            Ok(()) => log::info!("Ctrl+C received, shutting down..."),
                            Err(e) => log::error!("failed to listen for Ctrl+C: {e}"),
                        }
                        shutdown.cancel();
                    }
                }
            });
        }

        log::info!("weft agent is ready.");
        Ok(RunningAgent {
            runtime,
            control,
            controller_task,
        })
    }
}

impl RunningAgent {
    /// Returns a handle to control the components.
    pub fn control_handle(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Returns a handle to the runtime that executes the controller and the components.
    pub fn runtime(&self) -> &tokio::runtime::Handle {
        self.runtime.handle()
    }

    /// Loads a configuration, blocking the current thread until the graph has settled.
    ///
    /// With a `timeout` of `None`, waits as long as the evaluation of the graph takes.
    ///
    /// # Panics
    /// Panics if called from an async context.
    pub fn load_blocking(
        &self,
        source: &str,
        timeout: impl Into<Option<Duration>>,
    ) -> Result<LoadSummary, SendWaitError> {
        self.runtime.block_on(self.control.load(source, timeout))
    }

    /// Requests the agent to shut down. Use [`wait_for_shutdown`](Self::wait_for_shutdown) to wait for it.
    pub fn shutdown(&self) {
        self.control.shutdown();
    }

    /// Waits until the controller stops, which happens after a call to `shutdown` or after Ctrl+C.
    ///
    /// Every component is stopped before this function returns.
    pub fn wait_for_shutdown(self, timeout: Duration) -> anyhow::Result<()> {
        let mut n_errors = 0;

        // Tokio's timeout has a maximum timeout that is much smaller than Duration::MAX,
        // and will replace the latter by its maximum timeout.
        let timeout = Some(timeout).filter(|d| *d != Duration::MAX);

        let task = self.controller_task;
        let result = match timeout {
            Some(duration) => self.runtime.block_on(async { tokio::time::timeout(duration, task).await }),
            None => Ok(self.runtime.block_on(task)),
        };
        match result {
            Ok(Ok(())) => (),
            Ok(Err(e)) => {
                log::error!("The controller task failed: {e:?}");
                n_errors += 1;
            }
            Err(_elapsed) => {
                log::error!(
                    "Timeout of {} expired while waiting for the components to stop",
                    humantime::format_duration(timeout.unwrap_or_default())
                );
                n_errors += 1;
            }
        }

        // the blocking threads of the components that are still running are not awaited
        self.runtime.shutdown_timeout(Duration::from_secs(1));
        log::info!("The agent has stopped.");

        if n_errors == 0 {
            Ok(())
        } else {
            let error_str = if n_errors == 1 { "error" } else { "errors" };
            Err(anyhow!("{n_errors} {error_str} occurred during the shutdown phase"))
        }
    }
}

fn build_runtime(worker_threads: Option<usize>) -> std::io::Result<Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all().thread_name_fn(|| {
        static ATOMIC_ID: AtomicUsize = AtomicUsize::new(0);
        let id = ATOMIC_ID.fetch_add(1, Ordering::SeqCst);
        format!("weft-worker-{id}")
    });
    if let Some(n) = worker_threads {
        builder.worker_threads(n);
    }
    builder.build()
}
