//! Component kinds for debugging pipelines.

use std::{
    str::FromStr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, bail};
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::Notify;
use weft::{
    component::{BuildContext, Component, ComponentKind, Exports, RunContext},
    eval::Arguments,
    schema::{Registration, Schema, ValueType},
};

/// Returns the registrations of the `debug.*` kinds.
pub fn kinds() -> Vec<Registration> {
    weft::components![DebugLog, DebugCounter]
}

/// Logs its `message` each time it changes.
pub struct DebugLog {
    ctx: BuildContext,
}

impl DebugLog {
    fn apply(&self, args: &Arguments) -> anyhow::Result<()> {
        let level = args.get("level").and_then(|v| v.as_str()).unwrap_or("info");
        let level = log::Level::from_str(level).with_context(|| format!("invalid log level {level:?}"))?;
        let message = args.get("message").cloned().unwrap_or_default();
        log::log!(level, "{}: {message}", self.ctx.id());
        Ok(())
    }
}

impl ComponentKind for DebugLog {
    fn name() -> &'static str {
        "debug.log"
    }

    fn arguments() -> Schema {
        Schema::builder()
            .required("message", ValueType::Any)
            .with_default("level", ValueType::String, "info")
            .build()
    }

    fn build(ctx: BuildContext, args: Arguments) -> anyhow::Result<Self> {
        let component = Self { ctx };
        component.apply(&args)?;
        Ok(component)
    }
}

impl Component for DebugLog {
    fn update(&self, args: Arguments) -> anyhow::Result<()> {
        self.apply(&args)
    }
}

/// Exports a `count` that increases by `step` every `interval`, starting at `start`.
pub struct DebugCounter {
    config: Mutex<CounterConfig>,
    count: AtomicI64,
    reconfigured: Notify,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CounterConfig {
    start: i64,
    step: i64,
    #[serde(with = "humantime_serde")]
    interval: Duration,
}

impl CounterConfig {
    fn parse(args: &Arguments) -> anyhow::Result<Self> {
        let config: CounterConfig = args.deserialize().context("invalid arguments")?;
        if config.interval.is_zero() {
            bail!("interval must be greater than zero");
        }
        Ok(config)
    }
}

impl ComponentKind for DebugCounter {
    fn name() -> &'static str {
        "debug.counter"
    }

    fn arguments() -> Schema {
        Schema::builder()
            .with_default("start", ValueType::Int, 0)
            .with_default("step", ValueType::Int, 1)
            .with_default("interval", ValueType::Duration, "1s")
            .build()
    }

    fn exports() -> Schema {
        Schema::builder().optional("count", ValueType::Int).build()
    }

    fn build(ctx: BuildContext, args: Arguments) -> anyhow::Result<Self> {
        let config = CounterConfig::parse(&args)?;
        ctx.exports().publish(Exports::new().with("count", config.start))?;
        Ok(Self {
            count: AtomicI64::new(config.start),
            config: Mutex::new(config),
            reconfigured: Notify::new(),
        })
    }
}

impl Component for DebugCounter {
    /// The count continues from its current value, only the step and the interval are updated.
    fn update(&self, args: Arguments) -> anyhow::Result<()> {
        let config = CounterConfig::parse(&args)?;
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
        self.reconfigured.notify_one();
        Ok(())
    }

    fn run(self: Arc<Self>, ctx: RunContext) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async move {
            loop {
                let CounterConfig { step, interval, .. } =
                    self.config.lock().unwrap_or_else(PoisonError::into_inner).clone();
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = self.reconfigured.notified() => continue,
                    _ = tokio::time::sleep(interval) => {
                        let count = self.count.fetch_add(step, Ordering::Relaxed) + step;
                        ctx.exports().publish(Exports::new().with("count", count))?;
                    }
                }
            }
            Ok(())
        })
    }
}
