//! Binding-to-RDF conversion and triple store persistence.
//!
//! This crate provides:
//! - [`convert`] — inject bindings into a graph pattern, expand
//!   prefixes, and emit Turtle triples
//! - [`TripleStore`] — submit the triples to a SPARQL update endpoint
//!   and read them back via the query endpoint

pub mod convert;
pub mod store;

pub use convert::{expand_prefixes, inject_bindings, to_turtle};
pub use store::{
    ServerErrorPolicy, SparqlBindings, SparqlHead, SparqlResults, SparqlTerm, TripleStore,
};
