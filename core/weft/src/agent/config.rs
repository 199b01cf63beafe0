//! Loading of the agent configuration file.
//!
//! The agent configuration is a TOML file, distinct from the pipeline configuration written
//! in the weft language. It is read by a [`Loader`], which supports default contents,
//! overrides (typically from the command line) and substitution of environment variables.

use std::borrow::Cow;
use std::env::VarError;
use std::io;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use error::{InvalidSubstitutionError, LoadConfigError, LoadConfigErrorCause};

/// Loads the agent configuration from a TOML file.
pub struct Loader<'d> {
    file: PathBuf,
    default_provider: Option<Box<dyn DefaultConfigProvider + 'd>>,
    save_default: bool,
    overrides: Option<toml::Table>,
    substitute_env: bool,
}

/// Provides the content of the configuration when the file does not exist.
pub trait DefaultConfigProvider {
    fn default_config(&self) -> anyhow::Result<String>;
}

/// Provides the serialized `Default` value of a configuration type.
pub struct SerializedDefault<A: Serialize + Default> {
    config_type: PhantomData<A>,
}

impl<'d> Loader<'d> {
    /// Creates a new `Loader` that will read `config_file` on [`load`](Self::load).
    pub fn parse_file<P: Into<PathBuf>>(config_file: P) -> Self {
        Self {
            file: config_file.into(),
            default_provider: None,
            save_default: false,
            overrides: None,
            substitute_env: false,
        }
    }

    /// If the configuration file does not exist, uses the content given by `default_provider`.
    ///
    /// Set `save_to_file` to `true` to write the default config to the file specified
    /// by [`parse_file`](Self::parse_file).
    pub fn or_default<D: DefaultConfigProvider + 'd>(mut self, default_provider: D, save_to_file: bool) -> Self {
        self.default_provider = Some(Box::new(default_provider));
        self.save_default = save_to_file;
        self
    }

    /// Overrides the content of the configuration by [merging](merge_override) it
    /// with another table.
    ///
    /// Multiple overrides can be set. They are applied in order.
    pub fn with_override(mut self, config_override: toml::Table) -> Self {
        match &mut self.overrides {
            Some(existing) => merge_override(existing, config_override),
            None => self.overrides = Some(config_override),
        }
        self
    }

    /// Enables or disables the [substitution](substitute_env) of environment variables.
    ///
    /// The substitution is applied to the text of the file, before parsing it.
    pub fn substitute_env_variables(mut self, substitute_env: bool) -> Self {
        self.substitute_env = substitute_env;
        self
    }

    /// Loads the configuration with the provided settings.
    pub fn load(mut self) -> Result<toml::Table, LoadConfigError> {
        self.load_impl().map_err(|e| LoadConfigError {
            config_file: self.file,
            kind: e,
        })
    }

    fn load_impl(&mut self) -> Result<toml::Table, LoadConfigErrorCause> {
        let content = self.read_or_default()?;
        let content = if self.substitute_env {
            substitute_env(&content)?
        } else {
            Cow::Borrowed(content.as_str())
        };
        let mut table = toml::Table::from_str(&content)?;
        if let Some(overrides) = self.overrides.take() {
            merge_override(&mut table, overrides);
        }
        Ok(table)
    }

    fn read_or_default(&mut self) -> Result<String, LoadConfigErrorCause> {
        match std::fs::read_to_string(&self.file) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(provider) = self.default_provider.take() else {
                    return Err(LoadConfigErrorCause::Read(e));
                };
                let content = provider
                    .default_config()
                    .map_err(LoadConfigErrorCause::DefaultProvider)?;
                if self.save_default {
                    log::info!("Writing the default configuration to {}", self.file.display());
                    std::fs::write(&self.file, &content).map_err(LoadConfigErrorCause::DefaultWrite)?;
                }
                Ok(content)
            }
            Err(e) => Err(LoadConfigErrorCause::Read(e)),
        }
    }
}

impl<'f, F: Fn() -> anyhow::Result<toml::Table> + 'f> DefaultConfigProvider for F {
    fn default_config(&self) -> anyhow::Result<String> {
        let table = self()?;
        Ok(toml::to_string(&toml::Value::Table(table))?)
    }
}

impl<A: Serialize + Default> SerializedDefault<A> {
    pub fn new() -> Self {
        Self {
            config_type: PhantomData,
        }
    }
}

impl<A: Serialize + Default> Default for SerializedDefault<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Serialize + Default> DefaultConfigProvider for SerializedDefault<A> {
    fn default_config(&self) -> anyhow::Result<String> {
        let table = toml::Table::try_from(A::default())?;
        Ok(toml::to_string_pretty(&table)?)
    }
}

/// Replaces each `${VAR_NAME}` by the value of the environment variable `VAR_NAME`.
///
/// The pattern can be escaped to prevent its replacement: `\${NOT_A_VAR}` becomes `${NOT_A_VAR}`.
/// Variable names may only contain ASCII letters, digits and underscores.
pub fn substitute_env(input: &str) -> Result<Cow<'_, str>, InvalidSubstitutionError> {
    if !input.contains("${") {
        return Ok(Cow::Borrowed(input));
    }

    let mut res = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(begin) = rest.find("${") {
        if rest[..begin].ends_with('\\') {
            // escaped: drop the backslash, keep the dollar
            res.push_str(&rest[..begin - 1]);
            res.push_str("${");
            rest = &rest[begin + 2..];
            continue;
        }
        res.push_str(&rest[..begin]);
        let after = &rest[begin + 2..];
        let end = after.find('}').ok_or(InvalidSubstitutionError::WrongSyntax)?;
        let name = &after[..end];
        if name.contains("${") {
            return Err(InvalidSubstitutionError::WrongSyntax);
        }
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(InvalidSubstitutionError::InvalidName(name.to_owned()));
        }
        match std::env::var(name) {
            Ok(value) => res.push_str(&value),
            Err(VarError::NotPresent) => return Err(InvalidSubstitutionError::Missing(name.to_owned())),
            Err(VarError::NotUnicode(_)) => return Err(InvalidSubstitutionError::InvalidValue(name.to_owned())),
        }
        rest = &after[end + 1..];
    }
    res.push_str(rest);
    Ok(Cow::Owned(res))
}

/// Merges two toml tables by overriding the content of `original`
/// with the content of `overrider`.
///
/// This function performs a **deep merge**: nested tables are merged, other values are replaced.
pub fn merge_override(original: &mut toml::Table, overrider: toml::Table) {
    for (key, value) in overrider {
        match original.entry(key) {
            toml::map::Entry::Vacant(vacant) => {
                vacant.insert(value);
            }
            toml::map::Entry::Occupied(mut occupied) => match (occupied.get_mut(), value) {
                (toml::Value::Table(existing), toml::Value::Table(table_override)) => {
                    merge_override(existing, table_override);
                }
                (_, value) => {
                    occupied.insert(value);
                }
            },
        }
    }
}

pub mod error {
    use std::{io, path::PathBuf};
    use thiserror::Error;

    #[derive(Error, Debug)]
    #[error("could not load config from '{config_file}'")]
    pub struct LoadConfigError {
        pub config_file: PathBuf,
        #[source]
        pub(super) kind: LoadConfigErrorCause,
    }

    #[derive(Error, Debug)]
    pub(super) enum LoadConfigErrorCause {
        #[error("read failed")]
        Read(#[source] io::Error),
        #[error("default provider returned an error")]
        DefaultProvider(#[source] anyhow::Error),
        #[error("write (of default config) failed")]
        DefaultWrite(#[source] io::Error),
        #[error("env var substitution failed")]
        Substitution(#[from] InvalidSubstitutionError),
        #[error("invalid TOML config")]
        InvalidToml(#[from] toml::de::Error),
    }

    #[derive(Error, Debug, PartialEq)]
    pub enum InvalidSubstitutionError {
        /// The environment variable does not exist.
        #[error("the environment variable {0} does not exist")]
        Missing(String),
        /// The value of the variable is not valid UTF-8.
        #[error("value of env var {0} is not valid UTF-8")]
        InvalidValue(String),
        /// The name of the variable contains a forbidden character.
        #[error("env var name {0:?} is not valid")]
        InvalidName(String),
        /// The substitution syntax has not been used properly.
        #[error("wrong use of the substitution syntax, it should be ${{ENV_VAR}}")]
        WrongSyntax,
    }

    impl LoadConfigError {
        /// Returns `true` if the file could not be read because it does not exist.
        pub fn is_not_found(&self) -> bool {
            matches!(&self.kind, LoadConfigErrorCause::Read(e) if e.kind() == io::ErrorKind::NotFound)
        }
    }
}


#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    use super::{Loader, SerializedDefault, merge_override};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Settings {
        name: String,
        retries: u32,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                name: String::from("default"),
                retries: 3,
            }
        }
    }

    #[test]
    fn deep_merge() {
        let mut original = toml::Table::from_str(indoc! {r#"
            a = 1
            [t]
            x = "x"
            y = "y"
            [t.nested]
            z = true
        "#})
        .unwrap();
        let overrider = toml::Table::from_str(indoc! {r#"
            b = 2
            [t]
            y = "new"
            [t.nested]
            w = false
        "#})
        .unwrap();
        merge_override(&mut original, overrider);
        let expected = toml::Table::from_str(indoc! {r#"
            a = 1
            b = 2
            [t]
            x = "x"
            y = "new"
            [t.nested]
            z = true
            w = false
        "#})
        .unwrap();
        assert_eq!(original, expected);
    }

    #[test]
    fn default_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("agent.toml");

        let table = Loader::parse_file(&file)
            .or_default(SerializedDefault::<Settings>::new(), true)
            .load()
            .unwrap();
        let settings: Settings = toml::Value::Table(table).try_into().unwrap();
        assert_eq!(settings, Settings::default());
        assert!(file.exists());

        // the second time, the file is read
        std::fs::write(&file, "name = \"from file\"\nretries = 1").unwrap();
        let table = Loader::parse_file(&file)
            .or_default(SerializedDefault::<Settings>::new(), true)
            .load()
            .unwrap();
        let settings: Settings = toml::Value::Table(table).try_into().unwrap();
        assert_eq!(settings.name, "from file");
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Loader::parse_file(dir.path().join("nope.toml")).load().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn overrides_and_substitution() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("agent.toml");
        std::fs::write(&file, "name = \"${CARGO_PKG_NAME}\"\nretries = 1").unwrap();

        let mut overrides = toml::Table::new();
        overrides.insert(String::from("retries"), toml::Value::Integer(7));
        let table = Loader::parse_file(&file)
            .substitute_env_variables(true)
            .with_override(overrides)
            .load()
            .unwrap();
        let settings: Settings = toml::Value::Table(table).try_into().unwrap();
        assert_eq!(
            settings,
            Settings {
                name: String::from(env!("CARGO_PKG_NAME")),
                retries: 7
            }
        );

        // without substitution, the pattern is kept as is
        let table = Loader::parse_file(&file).load().unwrap();
        assert_eq!(table.get("name").and_then(|v| v.as_str()), Some("${CARGO_PKG_NAME}"));
    }
}
