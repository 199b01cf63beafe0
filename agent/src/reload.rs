//! Reloading of the pipeline file.
//!
//! The pipeline is reloaded when the content of its file changes (if polling is enabled),
//! and when the agent receives SIGHUP (on unix).

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use tokio::time::{Interval, MissedTickBehavior};
use weft::controller::{ControlHandle, SendWaitError};

/// The pipeline file, and the last content that has been read from it.
pub struct PipelineFile {
    path: PathBuf,
    last: Option<String>,
}

impl PipelineFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> anyhow::Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read the pipeline file {}", self.path.display()))
    }

    /// Reads the file.
    pub async fn read(&mut self) -> anyhow::Result<String> {
        let content = self.read_file().await?;
        self.last = Some(content.clone());
        Ok(content)
    }

    /// Reads the file, and returns `None` if its content has not changed since the last
    /// successful read.
    pub async fn read_if_changed(&mut self) -> anyhow::Result<Option<String>> {
        let content = self.read_file().await?;
        if self.last.as_ref() == Some(&content) {
            return Ok(None);
        }
        self.last = Some(content.clone());
        Ok(Some(content))
    }
}

/// Reloads the pipeline until the controller shuts down.
///
/// `file` should have been read once, for the initial load.
pub async fn watch(
    handle: ControlHandle,
    mut file: PipelineFile,
    poll_interval: Option<Duration>,
    mut hangup: Hangup,
) {
    let shutdown = handle.shutdown_token();
    let mut poll = poll_interval.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        let source = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick(&mut poll) => match file.read_if_changed().await {
                Ok(Some(source)) => {
                    log::info!("The pipeline file has changed, reloading it.");
                    source
                }
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("{e:#}");
                    continue;
                }
            },
            _ = hangup.recv() => {
                log::info!("SIGHUP received, reloading the pipeline file.");
                match file.read().await {
                    Ok(source) => source,
                    Err(e) => {
                        log::error!("{e:#}");
                        continue;
                    }
                }
            }
        };

        match handle.load(source.as_str(), None).await {
            Ok(_summary) => (),
            Err(SendWaitError::NotAvailable) => break,
            Err(e) => match e.diagnostics() {
                Some(diags) => log::error!(
                    "Invalid pipeline in {}, the running components are left untouched:\n{}",
                    file.path().display(),
                    diags.render(&source)
                ),
                None => log::error!("Failed to reload the pipeline: {e}"),
            },
        }
    }
    log::debug!("Stopped watching the pipeline file.");
}

async fn tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Receives the SIGHUP signals.
///
/// Once a `Hangup` has been created, SIGHUP no longer terminates the process.
/// It must be created in the context of a tokio runtime.
pub struct Hangup {
    #[cfg(unix)]
    signal: Option<tokio::signal::unix::Signal>,
}

impl Hangup {
    #[cfg(unix)]
    pub fn listen() -> Self {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::hangup()) {
            Ok(signal) => Self { signal: Some(signal) },
            Err(e) => {
                log::warn!("Cannot listen to SIGHUP, the pipeline will not be reloaded on SIGHUP: {e}");
                Self { signal: None }
            }
        }
    }

    #[cfg(not(unix))]
    pub fn listen() -> Self {
        Self {}
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        {
            if let Some(signal) = &mut self.signal {
                if signal.recv().await.is_some() {
                    return;
                }
                // the signal stream is closed
                self.signal = None;
            }
        }
        std::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Duration};

    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;
    use weft::{
        controller::{ControlHandle, Controller, ControllerOptions},
        eval::Value,
        test::{id, wait_for},
    };

    use super::{Hangup, PipelineFile, watch};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn start() -> ControlHandle {
        let controller = Controller::new(weft::test::registry(), ControllerOptions::default());
        let (handle, _task) = controller.start(CancellationToken::new(), &tokio::runtime::Handle::current());
        handle
    }

    /// Replaces the content of the file atomically, so that the watcher never reads a partial file.
    fn replace(path: &Path, content: &str) {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content).unwrap();
        std::fs::rename(&tmp, path).unwrap();
    }

    #[tokio::test]
    async fn detect_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.weft");
        std::fs::write(&path, "a").unwrap();

        let mut file = PipelineFile::new(&path);
        assert_eq!(file.read_if_changed().await.unwrap().as_deref(), Some("a"));
        assert_eq!(file.read_if_changed().await.unwrap(), None);

        std::fs::write(&path, "b").unwrap();
        assert_eq!(file.read_if_changed().await.unwrap().as_deref(), Some("b"));
        assert_eq!(file.read().await.unwrap(), "b");
        assert_eq!(file.read_if_changed().await.unwrap(), None);

        std::fs::remove_file(&path).unwrap();
        let err = file.read_if_changed().await.unwrap_err();
        assert!(err.to_string().contains("pipeline.weft"));
    }

    #[tokio::test]
    async fn failed_reads_keep_the_last_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.weft");
        std::fs::write(&path, "a").unwrap();

        let mut file = PipelineFile::new(&path);
        assert_eq!(file.read().await.unwrap(), "a");

        // the file is briefly missing, then comes back unchanged
        std::fs::remove_file(&path).unwrap();
        assert!(file.read_if_changed().await.is_err());
        std::fs::write(&path, "a").unwrap();
        assert_eq!(file.read_if_changed().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reload_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.weft");
        std::fs::write(&path, "testing.value \"v\" { value = 1 }").unwrap();

        let handle = start();
        let mut file = PipelineFile::new(&path);
        handle.load(file.read().await.unwrap(), TIMEOUT).await.unwrap();
        let watcher = tokio::spawn(watch(
            handle.clone(),
            file,
            Some(Duration::from_millis(10)),
            Hangup::listen(),
        ));

        // invalid pipelines are ignored
        replace(&path, "testing.value \"v\" {");
        tokio::time::sleep(Duration::from_millis(50)).await;
        replace(&path, "testing.value \"v\" { value = 2 }");
        let v = wait_for(
            &handle,
            &id("testing.value.v"),
            |i| i.export("value") == Some(&Value::Int(2)),
            TIMEOUT,
        )
        .await;
        assert_eq!(v.updates, 1);

        handle.shutdown();
        tokio::time::timeout(TIMEOUT, watcher).await.unwrap().unwrap();
    }
}
