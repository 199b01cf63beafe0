//! WEFT: a configuration language and a controller for reconfigurable component graphs.
//!
//! A weft configuration declares _components_, as blocks whose attributes may refer to the
//! _exports_ of other components:
//!
//! ```text
//! local.file "targets" {
//!     filename = "/etc/targets.txt"
//! }
//!
//! debug.log "print" {
//!     message = local.file.targets.content
//! }
//! ```
//!
//! The references define a dependency graph. The [controller] instantiates the components in
//! dependency order, and when the exports of a component change, it re-evaluates the arguments
//! of its dependents (and only them). Loading a new configuration applies the difference with
//! the running graph: removed components are stopped, new ones are started, and the changed
//! ones are updated in place.
//!
//! # This crate
//!
//! The processing of a configuration goes through the following steps:
//! 1. [Parsing](syntax) the text into blocks and attributes.
//! 2. [Checking](check) the blocks against the [schemas](schema) of their component kinds.
//! 3. Building the [graph] of components, resolving the references and rejecting cycles.
//! 4. [Evaluating](eval) the arguments of each component, and running it through the
//!    [component] interface.
//!
//! Every validation problem is reported as a [`Diagnostic`](syntax::diag::Diagnostic), and all
//! the problems of a configuration are reported together.
//!
//! To build a runnable application, see the [`agent`] module.

pub mod agent;
pub mod check;
pub mod component;
pub mod controller;
pub mod eval;
pub mod graph;
pub mod schema;
pub mod syntax;

#[cfg(feature = "test")]
pub mod test;
