//! Argument and export schemas of component kinds.
//!
//! A schema is declared once per component kind, with the explicit builder API:
//!
//! ```
//! use weft::schema::{BlockMultiplicity, Schema, ValueType};
//!
//! let client = Schema::builder().required("url", ValueType::String).build();
//! let args = Schema::builder()
//!     .required("filename", ValueType::String)
//!     .with_default("poll_frequency", ValueType::Duration, "1m")
//!     .block("client", client, BlockMultiplicity::Repeated)
//!     .build();
//!
//! assert!(args.get("filename").unwrap().required);
//! assert!(args.fields_by_path().contains_key("client.url"));
//! ```
//!
//! Schemas are registered in a [`Registry`] at startup and never change afterwards.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::eval::Value;

mod registry;
mod types;

pub use registry::{Registration, Registry, RegistryBuilder, RegistryError, UnknownKind};
pub use types::{Mismatch, ValueType};

/// How many times a nested block may appear, and how it is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockMultiplicity {
    /// At most once, evaluated to a map.
    Single,
    /// Any number of times, evaluated to a list of maps.
    Repeated,
    /// Any number of times with a unique label, evaluated to a map of maps keyed by label.
    Labeled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Attribute(ValueType),
    Block {
        schema: Arc<Schema>,
        multiplicity: BlockMultiplicity,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    /// Value used when an optional attribute is absent.
    pub default: Option<Value>,
}

/// The set of fields accepted in a block (arguments) or produced by a component (exports).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    fields: IndexMap<String, Field>,
    /// Every field, nested ones included, by dotted path.
    by_path: IndexMap<String, Field>,
    /// Mistakes made when building the schema, reported at registration.
    problems: Vec<String>,
}

#[derive(Default)]
pub struct SchemaBuilder {
    fields: IndexMap<String, Field>,
    problems: Vec<String>,
}

impl Field {
    pub fn value_type(&self) -> Option<&ValueType> {
        match &self.kind {
            FieldKind::Attribute(ty) => Some(ty),
            FieldKind::Block { .. } => None,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self.kind, FieldKind::Block { .. })
    }
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// A schema without any field.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Iterates on the top-level fields, in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the map of all the fields by dotted path, for instance
    /// `client.tls.insecure` for an attribute in nested blocks.
    pub fn fields_by_path(&self) -> &IndexMap<String, Field> {
        &self.by_path
    }

    /// Looks up a field by dotted path.
    pub fn lookup_path(&self, path: &str) -> Option<&Field> {
        self.by_path.get(path)
    }

    pub(crate) fn problems(&self) -> &[String] {
        &self.problems
    }
}

impl SchemaBuilder {
    pub fn required(self, name: &str, ty: ValueType) -> Self {
        self.field(name, FieldKind::Attribute(ty), true, None)
    }

    pub fn optional(self, name: &str, ty: ValueType) -> Self {
        self.field(name, FieldKind::Attribute(ty), false, None)
    }

    /// Adds an optional attribute that takes the value `default` when absent.
    pub fn with_default(mut self, name: &str, ty: ValueType, default: impl Into<Value>) -> Self {
        let default = match ty.coerce(default.into()) {
            Ok(v) => Some(v),
            Err(e) => {
                self.problems
                    .push(format!("invalid default for `{name}`: expected {}, found {}", e.expected, e.found));
                None
            }
        };
        self.field(name, FieldKind::Attribute(ty), false, default)
    }

    /// Adds an optional nested block.
    pub fn block(self, name: &str, schema: Schema, multiplicity: BlockMultiplicity) -> Self {
        let kind = FieldKind::Block {
            schema: Arc::new(schema),
            multiplicity,
        };
        self.field(name, kind, false, None)
    }

    /// Adds a nested block that must appear at least once.
    pub fn required_block(self, name: &str, schema: Schema, multiplicity: BlockMultiplicity) -> Self {
        let kind = FieldKind::Block {
            schema: Arc::new(schema),
            multiplicity,
        };
        self.field(name, kind, true, None)
    }

    fn field(mut self, name: &str, kind: FieldKind, required: bool, default: Option<Value>) -> Self {
        if !crate::syntax::print::is_identifier(name) {
            self.problems.push(format!("invalid field name `{name}`"));
        }
        let field = Field {
            name: name.to_owned(),
            kind,
            required,
            default,
        };
        if self.fields.insert(name.to_owned(), field).is_some() {
            self.problems.push(format!("field `{name}` is declared twice"));
        }
        self
    }

    pub fn build(self) -> Schema {
        let mut by_path = IndexMap::new();
        let mut problems = self.problems;
        for field in self.fields.values() {
            by_path.insert(field.name.clone(), field.clone());
            if let FieldKind::Block { schema, .. } = &field.kind {
                for (path, nested) in &schema.by_path {
                    by_path.insert(format!("{}.{path}", field.name), nested.clone());
                }
                problems.extend(schema.problems.iter().map(|p| format!("in block `{}`: {p}", field.name)));
            }
        }
        Schema {
            fields: self.fields,
            by_path,
            problems,
        }
    }
}
