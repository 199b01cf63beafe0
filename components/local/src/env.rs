use anyhow::Context;
use serde::Deserialize;
use weft::{
    component::{BuildContext, Component, ComponentKind, Exports},
    eval::{Arguments, Value},
    schema::{Schema, ValueType},
};

/// Exports the environment variables whose name starts with `prefix`.
///
/// The environment is read when the component is built and when its arguments change.
pub struct LocalEnv {
    ctx: BuildContext,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Config {
    prefix: String,
    strip_prefix: bool,
}

fn collect_vars(config: &Config) -> Vec<(String, String)> {
    // variables that are not valid unicode are ignored
    let mut vars: Vec<_> = std::env::vars_os()
        .filter_map(|(name, value)| {
            let (name, value) = (name.into_string().ok()?, value.into_string().ok()?);
            let stripped = name.strip_prefix(&config.prefix)?.to_owned();
            let key = if config.strip_prefix { stripped } else { name };
            Some((key, value))
        })
        .filter(|(key, _)| !key.is_empty())
        .collect();
    vars.sort();
    vars
}

impl LocalEnv {
    fn apply(&self, args: &Arguments) -> anyhow::Result<()> {
        let config: Config = args.deserialize().context("invalid arguments")?;
        let vars = collect_vars(&config);
        log::debug!("{}: {} environment variables", self.ctx.id(), vars.len());
        let vars = Value::Map(vars.into_iter().map(|(k, v)| (k, Value::from(v))).collect());
        self.ctx.exports().publish(Exports::new().with("vars", vars))?;
        Ok(())
    }
}

impl ComponentKind for LocalEnv {
    fn name() -> &'static str {
        "local.env"
    }

    fn arguments() -> Schema {
        Schema::builder()
            .with_default("prefix", ValueType::String, "")
            .with_default("strip_prefix", ValueType::Bool, false)
            .build()
    }

    fn exports() -> Schema {
        Schema::builder().optional("vars", ValueType::map(ValueType::String)).build()
    }

    fn build(ctx: BuildContext, args: Arguments) -> anyhow::Result<Self> {
        let component = Self { ctx };
        component.apply(&args)?;
        Ok(component)
    }
}

impl Component for LocalEnv {
    fn update(&self, args: Arguments) -> anyhow::Result<()> {
        self.apply(&args)
    }
}
