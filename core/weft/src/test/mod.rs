//! Testing utilities.
//!
//! # Rationale
//!
//! The behavior of the controller can only be observed through components: their
//! constructors, their updates, their exports and the way they stop. This module provides
//! a set of small component kinds whose behavior is driven by their arguments, and helpers
//! to wait for the graph to reach a given state.
//!
//! # Feature Flag
//!
//! To use this module, you need to enable the `test` feature of weft.
//! Since you only need it for testing, the feature should only be enabled in `dev-dependencies`.
//!
//! Extract of `Cargo.toml`:
//! ```toml
//! [dependencies]
//! weft = "version"
//!
//! [dev-dependencies]
//! weft = {version = "version", features = ["test"]}
//! ```
//!
//! # Component kinds
//!
//! | kind                 | arguments                                        | exports  |
//! |----------------------|--------------------------------------------------|----------|
//! | `testing.value`      | `value`, `fail_build`, `fail_update`, `delay`    | `value`  |
//! | `testing.passthrough`| `input`                                          | `output` |
//! | `testing.ticker`     | `count`                                          | `tick`   |
//! | `testing.fail`       | `message`                                        |          |
//! | `testing.probe`      | `name`, `input`, `exit`                          |          |

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::{Context, anyhow, bail};
use futures::future::BoxFuture;

use crate::component::{BuildContext, Component, ComponentKind, Exports, RunContext};
use crate::controller::{ComponentInfo, ControlHandle};
use crate::eval::Arguments;
use crate::graph::ComponentId;
use crate::schema::{Registration, Registry, Schema, ValueType};

/// Exports its `value` argument. Can be asked to fail, or to be slow.
pub struct ValueSource {
    ctx: BuildContext,
}

/// Exports its `input` as `output`.
pub struct Passthrough {
    ctx: BuildContext,
}

/// Publishes `tick = 1`, `tick = 2`, ..., `tick = count` as fast as possible when it starts.
pub struct Ticker {
    count: i64,
}

/// Its run task fails immediately, with `message`.
pub struct Failing {
    message: String,
}

/// Records the steps of its lifecycle, see [`probe_events`].
///
/// If `exit` is true, its run task returns as soon as it starts.
pub struct Probe {
    name: String,
    exit: bool,
}

static PROBE_EVENTS: Mutex<Vec<(String, &'static str)>> = Mutex::new(Vec::new());

fn record(name: &str, event: &'static str) {
    PROBE_EVENTS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push((name.to_owned(), event));
}

/// Returns the lifecycle events of the probes named `name`, in order:
/// `"built"`, `"updated"`, `"running"`, `"stopped"` (the run task observed the cancellation)
/// and `"shutdown"`.
pub fn probe_events(name: &str) -> Vec<&'static str> {
    PROBE_EVENTS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .filter(|(n, _)| n == name)
        .map(|(_, e)| *e)
        .collect()
}

fn flag(args: &Arguments, name: &str) -> bool {
    args.get(name).and_then(|v| v.as_bool()).unwrap_or(false)
}

impl ValueSource {
    fn apply(&self, args: &Arguments) -> anyhow::Result<()> {
        let value = args.get("value").cloned().unwrap_or_default();
        self.ctx.exports().publish(Exports::new().with("value", value))?;
        Ok(())
    }
}

impl ComponentKind for ValueSource {
    fn name() -> &'static str {
        "testing.value"
    }

    fn arguments() -> Schema {
        Schema::builder()
            .required("value", ValueType::Any)
            .with_default("fail_build", ValueType::Bool, false)
            .with_default("fail_update", ValueType::Bool, false)
            .optional("delay", ValueType::Duration)
            .build()
    }

    fn exports() -> Schema {
        Schema::builder().optional("value", ValueType::Any).build()
    }

    fn build(ctx: BuildContext, args: Arguments) -> anyhow::Result<Self> {
        if let Some(delay) = args.get("delay").and_then(|v| v.as_str()) {
            let delay = humantime::parse_duration(delay).context("invalid delay")?;
            std::thread::sleep(delay);
        }
        if flag(&args, "fail_build") {
            bail!("build failure requested");
        }
        let component = Self { ctx };
        component.apply(&args)?;
        Ok(component)
    }
}

impl Component for ValueSource {
    fn update(&self, args: Arguments) -> anyhow::Result<()> {
        if flag(&args, "fail_update") {
            bail!("update failure requested");
        }
        self.apply(&args)
    }
}

impl Passthrough {
    fn apply(&self, args: &Arguments) -> anyhow::Result<()> {
        let input = args.get("input").cloned().unwrap_or_default();
        self.ctx.exports().publish(Exports::new().with("output", input))?;
        Ok(())
    }
}

impl ComponentKind for Passthrough {
    fn name() -> &'static str {
        "testing.passthrough"
    }

    fn arguments() -> Schema {
        Schema::builder().required("input", ValueType::Any).build()
    }

    fn exports() -> Schema {
        Schema::builder().optional("output", ValueType::Any).build()
    }

    fn build(ctx: BuildContext, args: Arguments) -> anyhow::Result<Self> {
        let component = Self { ctx };
        component.apply(&args)?;
        Ok(component)
    }
}

impl Component for Passthrough {
    fn update(&self, args: Arguments) -> anyhow::Result<()> {
        self.apply(&args)
    }
}

impl ComponentKind for Ticker {
    fn name() -> &'static str {
        "testing.ticker"
    }

    fn arguments() -> Schema {
        Schema::builder().required("count", ValueType::Int).build()
    }

    fn exports() -> Schema {
        Schema::builder().optional("tick", ValueType::Int).build()
    }

    fn build(_ctx: BuildContext, args: Arguments) -> anyhow::Result<Self> {
        let count = args.get("count").and_then(|v| v.as_int()).unwrap_or_default();
        Ok(Self { count })
    }
}

impl Component for Ticker {
    fn update(&self, _args: Arguments) -> anyhow::Result<()> {
        Err(anyhow!("the count of a ticker cannot change"))
    }

    fn run(self: Arc<Self>, ctx: RunContext) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async move {
            // no await point: the controller cannot observe the intermediate values
            for tick in 1..=self.count {
                ctx.exports().publish(Exports::new().with("tick", tick))?;
            }
            ctx.cancelled().await;
            Ok(())
        })
    }
}

impl ComponentKind for Failing {
    fn name() -> &'static str {
        "testing.fail"
    }

    fn arguments() -> Schema {
        Schema::builder()
            .with_default("message", ValueType::String, "failure requested")
            .build()
    }

    fn build(_ctx: BuildContext, args: Arguments) -> anyhow::Result<Self> {
        let message = args.get("message").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(Self {
            message: message.to_owned(),
        })
    }
}

impl Component for Failing {
    fn update(&self, _args: Arguments) -> anyhow::Result<()> {
        Ok(())
    }

    fn run(self: Arc<Self>, _ctx: RunContext) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async move { Err(anyhow!("{}", self.message)) })
    }
}

impl ComponentKind for Probe {
    fn name() -> &'static str {
        "testing.probe"
    }

    fn arguments() -> Schema {
        Schema::builder()
            .required("name", ValueType::String)
            .optional("input", ValueType::Any)
            .with_default("exit", ValueType::Bool, false)
            .build()
    }

    fn build(_ctx: BuildContext, args: Arguments) -> anyhow::Result<Self> {
        let name = args.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
        record(&name, "built");
        Ok(Self {
            name,
            exit: flag(&args, "exit"),
        })
    }
}

impl Component for Probe {
    fn update(&self, _args: Arguments) -> anyhow::Result<()> {
        record(&self.name, "updated");
        Ok(())
    }

    fn run(self: Arc<Self>, ctx: RunContext) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async move {
            record(&self.name, "running");
            if self.exit {
                return Ok(());
            }
            ctx.cancelled().await;
            record(&self.name, "stopped");
            Ok(())
        })
    }

    fn shutdown(&self) {
        record(&self.name, "shutdown");
    }
}

/// Returns the registrations of every testing component kind.
pub fn kinds() -> Vec<Registration> {
    crate::components![ValueSource, Passthrough, Ticker, Failing, Probe]
}

/// Returns a registry that contains every testing component kind.
pub fn registry() -> Registry {
    let mut builder = Registry::builder();
    builder.register_all(kinds()).expect("the testing kinds should be valid");
    builder.build()
}

/// Parses a component id written as in configuration files, for instance `testing.value.a`.
///
/// The last segment is the label, the other ones are the kind. Use [`ComponentId::new`]
/// for unlabeled components.
pub fn id(s: &str) -> ComponentId {
    match s.rsplit_once('.') {
        Some((kind, label)) => ComponentId::new(kind, Some(label)),
        None => ComponentId::new(s, None),
    }
}

/// Polls the state of a component until `predicate` returns `true`.
///
/// # Panics
/// Panics if `timeout` expires, or if the component does not exist.
pub async fn wait_for(
    handle: &ControlHandle,
    component: &ComponentId,
    predicate: impl Fn(&ComponentInfo) -> bool,
    timeout: Duration,
) -> ComponentInfo {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let info = handle
            .component_info(component.clone(), timeout)
            .await
            .unwrap_or_else(|e| panic!("cannot get the state of {component}: {e}"));
        if predicate(&info) {
            return info;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timeout expired while waiting for {component}, last state: {info}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
