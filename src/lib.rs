//! Schema-to-type-model core: parsed schema documents in, a finalized,
//! renderer-ready type graph out.
//!
//! ```text
//! build → package → inheritance → generics → unions → compress → FinalizedModel
//! ```
pub mod builder;
pub mod compress;
pub mod config;
pub mod error;
pub mod generics;
pub mod graph;
pub mod inheritance;
pub mod jq_exec;
pub mod model;
pub mod naming;
pub mod package;
pub mod path_de;
pub mod pipeline;
pub mod runtime;
pub mod schema;
pub mod structure;
pub mod unions;

pub use config::{CompressionPolicy, Options};
pub use error::{ModelError, SchemaLocation};
pub use model::FinalizedModel;
pub use pipeline::Pipeline;
pub use schema::SchemaDocument;
