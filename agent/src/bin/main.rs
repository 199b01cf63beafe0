use std::{path::Path, str::FromStr};

use anyhow::{Context, anyhow};
use clap::{Args, FromArgMatches};
use cli::{ConfigArgs, ConfigCommand};
use weft::{
    agent::{
        self,
        config::{DefaultConfigProvider, Loader, SerializedDefault, merge_override},
    },
    controller,
    schema::Registry,
};
use weft_agent::{
    builtin_registry,
    config::AgentConfig,
    describe_kinds, init_logger,
    reload::{self, PipelineFile},
};

const BINARY: &str = env!("CARGO_BIN_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Main agent function.
///
/// The steps are:
/// - build the registry of the available component kinds
/// - parse the CLI
/// - parse the config file
/// - start the controller and load the pipeline
/// - reload the pipeline when it changes, until the agent is stopped
///
/// About errors: we use `anyhow::Result` and `context` instead of `expect` to get
/// nicer error messages (`expect` prints errors with `Debug`).
fn main() -> anyhow::Result<()> {
    init_logger();

    let registry = builtin_registry().context("invalid component registry")?;

    // Define the command-line interface.
    let mut cmd = clap::Command::new(BINARY).version(VERSION);
    cmd = cli::Cli::augment_args(cmd);

    // Parse CLI arguments and handle some special flags like --version and --help.
    let matches = cmd.get_matches();
    let args = match cli::Cli::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(e) => e.exit(),
    };

    // Run CLI commands that run before the config is loaded.
    if run_command_no_config(&args, &registry)? {
        return Ok(());
    }

    log::info!("Starting weft agent '{BINARY}' v{VERSION}");

    // parse config file
    let config_override = parse_config_overrides(&args).context("invalid config overrides")?;
    let mut loader = Loader::parse_file(&args.common.config);
    if !args.common.no_default_config {
        loader = loader.or_default(SerializedDefault::<AgentConfig>::new(), true);
    }
    let config = loader
        .substitute_env_variables(true)
        .with_override(config_override)
        .load()
        .context("could not load config file")?;
    let config: AgentConfig = toml::Value::Table(config)
        .try_into()
        .context("invalid agent config")?;

    // start the controller, without any component
    let agent = agent::Builder::new(registry)
        .options(config.controller_options())
        .build_and_start()
        .context("startup failure")?;

    // listen to SIGHUP before anything can send it
    let hangup = {
        let _guard = agent.runtime().enter();
        reload::Hangup::listen()
    };

    // load the pipeline
    let mut pipeline = PipelineFile::new(&config.pipeline_file);
    let source = agent.runtime().block_on(pipeline.read())?;
    match agent.load_blocking(&source, None) {
        Ok(summary) => log::info!("Pipeline {} started: {summary}", pipeline.path().display()),
        Err(e) => {
            if let Some(diags) = e.diagnostics() {
                eprintln!("{}", diags.render(&source));
            }
            agent.shutdown();
            agent.wait_for_shutdown(config.shutdown_timeout)?;
            return Err(anyhow!("invalid pipeline in {}", pipeline.path().display()));
        }
    }

    // reload the pipeline until the agent is stopped (e.g. by Ctrl+C)
    let handle = agent.control_handle();
    let shutdown = handle.shutdown_token();
    agent
        .runtime()
        .spawn(reload::watch(handle, pipeline, config.reload_interval(), hangup));
    agent.runtime().block_on(shutdown.cancelled());
    agent
        .wait_for_shutdown(config.shutdown_timeout)
        .context("error while shutting down")?;
    Ok(())
}

/// If selected by the CLI user, runs a command that does not need the config file.
///
/// Returns `true` if a command was run (in which case you probably should stop here).
fn run_command_no_config(args: &cli::Cli, registry: &Registry) -> anyhow::Result<bool> {
    use cli::Command;

    match &args.command {
        Some(Command::Config(ConfigArgs {
            command: ConfigCommand::Regen,
        })) => {
            // (re)generate the default config
            let file = &args.common.config;
            let new_config = SerializedDefault::<AgentConfig>::new().default_config()?;
            std::fs::write(file, new_config).with_context(|| format!("could not write {file}"))?;
            log::info!("Default configuration file written to: {file}");
            Ok(true)
        }
        Some(Command::Components) => {
            print!("{}", describe_kinds(registry));
            Ok(true)
        }
        Some(Command::Check { pipeline }) => {
            check_pipeline(pipeline, registry)?;
            Ok(true)
        }
        Some(Command::Run) | None => Ok(false),
    }
}

/// Validates a pipeline file without starting any component.
fn check_pipeline(file: &Path, registry: &Registry) -> anyhow::Result<()> {
    let source =
        std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    match controller::compile(&source, registry) {
        Ok((graph, warnings)) => {
            if !warnings.is_empty() {
                eprint!("{}", warnings.render(&source));
            }
            println!("{}: {} components, the pipeline is valid.", file.display(), graph.len());
            Ok(())
        }
        Err(diags) => {
            eprint!("{}", diags.render(&source));
            let n = diags.errors().count();
            let error_str = if n == 1 { "error" } else { "errors" };
            Err(anyhow!("{}: {n} {error_str} found", file.display()))
        }
    }
}

/// Parses the config overrides provided on the command line, and merges them into a single table.
fn parse_config_overrides(args: &cli::Cli) -> anyhow::Result<toml::Table> {
    let mut config_override = toml::Table::new();
    if let Some(overrides) = &args.common.config_override {
        for o in overrides {
            let parsed_override =
                toml::Table::from_str(o).with_context(|| format!("config override is not a valid TOML table: {o}"))?;
            merge_override(&mut config_override, parsed_override);
        }
    }

    // Special cases for easier local use.
    if let Some(pipeline) = &args.common.pipeline {
        let path = pipeline.to_string_lossy().into_owned();
        merge_override(
            &mut config_override,
            toml::Table::from_iter([(String::from("pipeline_file"), toml::Value::String(path))]),
        );
    }
    if let Some(interval) = args.common.reload_interval {
        let interval = humantime_serde::re::humantime::format_duration(interval).to_string();
        merge_override(
            &mut config_override,
            toml::Table::from_iter([(String::from("reload_interval"), toml::Value::String(interval))]),
        );
    }

    Ok(config_override)
}

/// Agent command-line interface (CLI).
///
/// We use `clap` to parse these options, therefore the structs
/// derive [`clap::Args`] or other clap trait implementations.
mod cli {
    use std::{path::PathBuf, time::Duration};

    use clap::{Args, Parser, Subcommand};

    // NOTE: the doc comment attached to `Cli` is used by clap as the description of
    // the application. It is displayed at the start of the help message.

    /// weft agent: run a pipeline of components described in the weft configuration language.
    #[derive(Parser)]
    pub struct Cli {
        #[command(subcommand)]
        pub command: Option<Command>,

        #[command(flatten)]
        pub common: CommonArgs,
    }

    #[derive(Subcommand)]
    pub enum Command {
        /// Run the pipeline, and reload it when it changes.
        ///
        /// This is the default command.
        Run,

        /// Check a pipeline file and report every problem, without running it.
        Check {
            /// The pipeline file to check.
            pipeline: PathBuf,
        },

        /// Print the available component kinds, with their arguments and exports.
        Components,

        /// Manipulate the configuration.
        Config(ConfigArgs),
    }

    #[derive(Args)]
    pub struct ConfigArgs {
        #[command(subcommand)]
        pub command: ConfigCommand,
    }

    #[derive(Subcommand)]
    pub enum ConfigCommand {
        /// Regenerate the configuration file and stop.
        ///
        /// If the file exists, it will be overwritten.
        Regen,
    }

    /// Common CLI arguments.
    #[derive(Args, Clone)]
    pub struct CommonArgs {
        /// Path to the config file.
        #[arg(long, env = "WEFT_CONFIG", default_value = "weft.toml")]
        pub config: String,

        /// If set, the config file must exist, otherwise the agent will fail to start with an error.
        #[arg(long, default_value_t = false)]
        pub no_default_config: bool,

        /// Config options overrides.
        ///
        /// Each override is a TOML table, ex. `stop_timeout='1s'`
        #[arg(long)]
        pub config_override: Option<Vec<String>>,

        /// Path to the pipeline file, overrides `pipeline_file` of the config.
        #[arg(long, env = "WEFT_PIPELINE")]
        pub pipeline: Option<PathBuf>,

        /// How often to check the pipeline file for changes (0 to disable), overrides `reload_interval` of the config.
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
        pub reload_interval: Option<Duration>,
    }
}
