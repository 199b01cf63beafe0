//! Standard weft agent: runs a pipeline of components described in the weft language.
//!
//! The binary is in `src/bin/main.rs`. This library contains the parts of the agent
//! that can be tested on their own.

use std::fmt::Write;

use env_logger::Env;
use weft::schema::{FieldKind, Registry, RegistryError, Schema};

pub mod config;
pub mod reload;

/// Initializes the global logger.
///
/// Call this first! The default level is `info`, use the `RUST_LOG` environment variable
/// to change it.
///
/// # Example
///
/// ```
/// use weft_agent::init_logger;
///
/// fn main() {
///     init_logger();
///     log::info!("I can log now!");
/// }
/// ```
pub fn init_logger() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    // Print a warning if we are running in debug mode.
    #[cfg(debug_assertions)]
    {
        log::warn!("DEBUG assertions are enabled, this build of weft is fine for debugging, but not for production.");
    }
}

/// Returns a registry that contains the component kinds shipped with the agent.
pub fn builtin_registry() -> Result<Registry, RegistryError> {
    let mut builder = Registry::builder();
    builder.register_all(component_local::kinds())?;
    builder.register_all(component_debug::kinds())?;
    Ok(builder.build())
}

/// Describes the arguments and the exports of every kind of the registry.
///
/// # Example output
///
/// ```text
/// local.file
///   arguments:
///     filename: string (required)
///     poll_frequency: duration = "1m"
///   exports:
///     content: string
/// ```
pub fn describe_kinds(registry: &Registry) -> String {
    let mut out = String::new();
    for registration in registry.iter() {
        let _ = writeln!(out, "{}", registration.name);
        let _ = writeln!(out, "  arguments:");
        describe_schema(&registration.arguments, 2, &mut out);
        if !registration.exports.is_empty() {
            let _ = writeln!(out, "  exports:");
            describe_schema(&registration.exports, 2, &mut out);
        }
    }
    out
}

fn describe_schema(schema: &Schema, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    if schema.is_empty() {
        let _ = writeln!(out, "{indent}(none)");
    }
    for field in schema.fields() {
        match &field.kind {
            FieldKind::Attribute(ty) => {
                let _ = write!(out, "{indent}{}: {ty}", field.name);
            }
            FieldKind::Block { multiplicity, .. } => {
                let _ = write!(out, "{indent}{} {{ }} ({multiplicity:?} block)", field.name);
            }
        }
        if field.required {
            out.push_str(" (required)");
        } else if let Some(default) = &field.default {
            let _ = write!(out, " = {default}");
        }
        out.push('\n');
        if let FieldKind::Block { schema, .. } = &field.kind {
            describe_schema(schema, depth + 1, out);
        }
    }
}
