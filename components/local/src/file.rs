use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::{Context, bail};
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::Notify;
use weft::{
    component::{BuildContext, Component, ComponentKind, Exports, RunContext},
    eval::Arguments,
    schema::{Schema, ValueType},
};

/// Exports the content of a file, and re-reads it every `poll_frequency`.
///
/// The file must be readable when the component is built. If it becomes unreadable later,
/// the last content stays exported and a warning is logged at each poll.
pub struct LocalFile {
    ctx: BuildContext,
    config: Mutex<Config>,
    /// Restarts the poll timer after an update.
    reconfigured: Notify,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Config {
    filename: PathBuf,
    #[serde(with = "humantime_serde")]
    poll_frequency: Duration,
}

impl Config {
    fn parse(args: &Arguments) -> anyhow::Result<Self> {
        let config: Config = args.deserialize().context("invalid arguments")?;
        if config.poll_frequency.is_zero() {
            bail!("poll_frequency must be greater than zero");
        }
        Ok(config)
    }
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

impl LocalFile {
    fn config(&self) -> Config {
        self.config.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn publish(&self, content: String) -> anyhow::Result<()> {
        self.ctx.exports().publish(Exports::new().with("content", content))?;
        Ok(())
    }
}

impl ComponentKind for LocalFile {
    fn name() -> &'static str {
        "local.file"
    }

    fn arguments() -> Schema {
        Schema::builder()
            .required("filename", ValueType::String)
            .with_default("poll_frequency", ValueType::Duration, "1m")
            .build()
    }

    fn exports() -> Schema {
        Schema::builder().optional("content", ValueType::String).build()
    }

    fn build(ctx: BuildContext, args: Arguments) -> anyhow::Result<Self> {
        let config = Config::parse(&args)?;
        let content = read_file(&config.filename)?;
        log::debug!("{}: watching {}", ctx.id(), config.filename.display());
        let component = Self {
            ctx,
            config: Mutex::new(config),
            reconfigured: Notify::new(),
        };
        component.publish(content)?;
        Ok(component)
    }
}

impl Component for LocalFile {
    fn update(&self, args: Arguments) -> anyhow::Result<()> {
        let config = Config::parse(&args)?;
        let content = read_file(&config.filename)?;
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
        self.publish(content)?;
        self.reconfigured.notify_one();
        Ok(())
    }

    fn run(self: Arc<Self>, ctx: RunContext) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async move {
            loop {
                let Config {
                    filename,
                    poll_frequency,
                } = self.config();
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = self.reconfigured.notified() => continue,
                    _ = tokio::time::sleep(poll_frequency) => {
                        match tokio::fs::read_to_string(&filename).await {
                            Ok(content) => self.publish(content)?,
                            Err(e) => log::warn!("{}: failed to read {}: {e}", ctx.id(), filename.display()),
                        }
                    }
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use weft::{
        controller::NodeState,
        eval::Value,
        syntax::diag::DiagnosticCode,
        test::{id, wait_for},
    };

    use crate::tests::start;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn content_follows_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.txt");
        std::fs::write(&path, "first").unwrap();

        let handle = start();
        let config = format!(
            "local.file \"targets\" {{\n filename = \"{}\"\n poll_frequency = \"20ms\"\n}}\n\
             testing.passthrough \"p\" {{ input = local.file.targets.content }}",
            path.display()
        );
        handle.load(config, TIMEOUT).await.unwrap();

        let p = handle.component_info(id("testing.passthrough.p"), TIMEOUT).await.unwrap();
        assert_eq!(p.export("output"), Some(&Value::from("first")));

        std::fs::write(&path, "second").unwrap();
        wait_for(
            &handle,
            &id("testing.passthrough.p"),
            |i| i.export("output") == Some(&Value::from("second")),
            TIMEOUT,
        )
        .await;

        // the file disappears: the last content stays
        std::fs::remove_file(&path).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let f = handle.component_info(id("local.file.targets"), TIMEOUT).await.unwrap();
        assert_eq!(f.state, NodeState::Running);
        assert_eq!(f.export("content"), Some(&Value::from("second")));
    }

    #[tokio::test]
    async fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.txt");

        let handle = start();
        let config = format!("local.file \"missing\" {{ filename = \"{}\" }}", path.display());
        handle.load(config, TIMEOUT).await.unwrap();

        let f = handle.component_info(id("local.file.missing"), TIMEOUT).await.unwrap();
        assert_eq!(f.state, NodeState::Failed);
        assert_eq!(f.health.code(), Some(DiagnosticCode::InitializationError));
        assert!(f.health.to_string().contains("failed to read"), "{}", f.health);
    }

    #[tokio::test]
    async fn zero_poll_frequency() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, "").unwrap();

        let handle = start();
        let config = format!(
            "local.file \"zero\" {{\n filename = \"{}\"\n poll_frequency = \"0s\"\n}}",
            path.display()
        );
        handle.load(config, TIMEOUT).await.unwrap();

        let f = handle.component_info(id("local.file.zero"), TIMEOUT).await.unwrap();
        assert_eq!(f.state, NodeState::Failed);
        assert!(f.health.to_string().contains("greater than zero"), "{}", f.health);
    }
}
