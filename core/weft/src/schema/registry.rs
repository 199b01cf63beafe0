use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use thiserror::Error;

use super::{FieldKind, Schema};
use crate::component::{BuildContext, Component, ComponentKind};
use crate::eval::Arguments;

/// Creates a list of [`Registration`]s from a list of types that implement [`ComponentKind`].
///
/// # Example
///
/// ```ignore
/// use weft::components;
///
/// let registrations = components![LocalFile, DebugLog];
/// ```
#[macro_export]
macro_rules! components {
    // ```
    // components![KindA, ...];
    // ```
    //
    // desugars to:
    // ```
    // vec![Registration::of::<KindA>(), ...]
    // ```
    [] => {
        Vec::<$crate::schema::Registration>::new()
    };
    [$( $(#[$m:meta])* $x:path ),+ $(,)?] => {
        {
            vec![
                $(
                    $(#[$m])*
                    $crate::schema::Registration::of::<$x>(),
                )*
            ] as Vec<$crate::schema::Registration>
        }
    }
}

type Constructor = dyn Fn(BuildContext, Arguments) -> anyhow::Result<Arc<dyn Component>> + Send + Sync;

/// Everything the controller needs to know about a component kind.
pub struct Registration {
    /// Dotted name of the kind, for instance `local.file`.
    pub name: String,
    pub arguments: Arc<Schema>,
    pub exports: Arc<Schema>,
    constructor: Box<Constructor>,
}

/// The set of known component kinds. Immutable once built.
#[derive(Clone, Default)]
pub struct Registry {
    kinds: Arc<IndexMap<String, Arc<Registration>>>,
}

#[derive(Default)]
pub struct RegistryBuilder {
    kinds: IndexMap<String, Arc<Registration>>,
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown component kind `{0}`")]
pub struct UnknownKind(pub String);

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("component kind `{0}` is registered twice")]
    DuplicateKind(String),
    #[error("invalid component kind name `{0}`: it should be a dotted list of identifiers")]
    InvalidKindName(String),
    #[error("invalid schema for component kind `{kind}`: {problem}")]
    InvalidSchema { kind: String, problem: String },
    #[error("component kind `{kind}` exports a block `{field}`, but exports can only be attributes")]
    BlockInExports { kind: String, field: String },
}

impl Registration {
    /// Creates the registration of a statically known kind.
    pub fn of<K: ComponentKind>() -> Self {
        Self::new(K::name(), K::arguments(), K::exports(), |ctx, args| {
            let component = K::build(ctx, args)?;
            Ok(Arc::new(component) as Arc<dyn Component>)
        })
    }

    pub fn new<F>(name: impl Into<String>, arguments: Schema, exports: Schema, constructor: F) -> Self
    where
        F: Fn(BuildContext, Arguments) -> anyhow::Result<Arc<dyn Component>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arguments: Arc::new(arguments),
            exports: Arc::new(exports),
            constructor: Box::new(constructor),
        }
    }

    /// Creates a new instance of the component.
    pub fn build(&self, ctx: BuildContext, args: Arguments) -> anyhow::Result<Arc<dyn Component>> {
        (self.constructor)(ctx, args)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn lookup(&self, kind: &str) -> Result<&Arc<Registration>, UnknownKind> {
        self.kinds.get(kind).ok_or_else(|| UnknownKind(kind.to_owned()))
    }

    /// Iterates on the registered kinds, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Registration>> {
        self.kinds.values()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds.keys()).finish()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: Registration) -> Result<(), RegistryError> {
        let name = registration.name.clone();
        let valid_name = !name.is_empty() && name.split('.').all(crate::syntax::print::is_identifier);
        if !valid_name {
            return Err(RegistryError::InvalidKindName(name));
        }
        if self.kinds.contains_key(&name) {
            return Err(RegistryError::DuplicateKind(name));
        }
        let problem = registration
            .arguments
            .problems()
            .iter()
            .chain(registration.exports.problems())
            .next();
        if let Some(problem) = problem {
            return Err(RegistryError::InvalidSchema {
                kind: name,
                problem: problem.clone(),
            });
        }
        if let Some(block) = registration.exports.fields().find(|f| matches!(f.kind, FieldKind::Block { .. })) {
            return Err(RegistryError::BlockInExports {
                kind: name,
                field: block.name.clone(),
            });
        }
        log::trace!("registered component kind {name}");
        self.kinds.insert(name, Arc::new(registration));
        Ok(())
    }

    pub fn register_all(&mut self, registrations: impl IntoIterator<Item = Registration>) -> Result<(), RegistryError> {
        for r in registrations {
            self.register(r)?;
        }
        Ok(())
    }

    pub fn build(self) -> Registry {
        Registry {
            kinds: Arc::new(self.kinds),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Registration, Registry, RegistryError, UnknownKind};
    use crate::component::Component;
    use crate::eval::Arguments;
    use crate::schema::{BlockMultiplicity, Schema, ValueType};

    struct Nothing;

    impl Component for Nothing {
        fn update(&self, _args: Arguments) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registration(name: &str, arguments: Schema, exports: Schema) -> Registration {
        Registration::new(name, arguments, exports, |_, _| Ok(Arc::new(Nothing) as Arc<dyn Component>))
    }

    #[test]
    fn lookup() {
        let mut builder = Registry::builder();
        builder
            .register(registration("local.file", Schema::empty(), Schema::empty()))
            .unwrap();
        builder.register(registration("source", Schema::empty(), Schema::empty())).unwrap();
        let registry = builder.build();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup("local.file").unwrap().name, "local.file");
        assert_eq!(
            registry.lookup("local.files").unwrap_err(),
            UnknownKind(String::from("local.files"))
        );
    }

    #[test]
    fn rejected_registrations() {
        let mut builder = Registry::builder();
        builder.register(registration("a.b", Schema::empty(), Schema::empty())).unwrap();
        assert_eq!(
            builder.register(registration("a.b", Schema::empty(), Schema::empty())),
            Err(RegistryError::DuplicateKind(String::from("a.b")))
        );
        assert_eq!(
            builder.register(registration("a..b", Schema::empty(), Schema::empty())),
            Err(RegistryError::InvalidKindName(String::from("a..b")))
        );
        assert_eq!(
            builder.register(registration("", Schema::empty(), Schema::empty())),
            Err(RegistryError::InvalidKindName(String::new()))
        );

        let nested = Schema::builder()
            .block("x", Schema::empty(), BlockMultiplicity::Single)
            .build();
        assert!(matches!(
            builder.register(registration("c", Schema::empty(), nested)),
            Err(RegistryError::BlockInExports { .. })
        ));

        let twice = Schema::builder()
            .required("x", ValueType::Int)
            .required("x", ValueType::Int)
            .build();
        assert!(matches!(
            builder.register(registration("d", twice, Schema::empty())),
            Err(RegistryError::InvalidSchema { .. })
        ));
    }
}
