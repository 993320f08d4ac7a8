//! Dictionary declarations for the memdict engine.
//!
//! A dictionary is declared before it is loaded: the [`DictionaryStructure`] names the
//! key shape and the attributes, and [`DictionaryOptions`] controls how the engine lays
//! the data out in memory and how the load behaves. Both are plain serde-friendly
//! values so deployments can keep them in configuration files.
//!
//! The declared types are deliberately a tag layer over Arrow: every [`ValueKind`] maps
//! to exactly one Arrow [`DataType`](arrow::datatypes::DataType), and the engine checks
//! incoming batches and lookup requests against that mapping instead of casting.

pub mod kind;
pub mod options;
pub mod scalar;
pub mod structure;

pub use kind::ValueKind;
pub use options::{DictionaryLifetime, DictionaryOptions, TableLayout};
pub use scalar::ScalarValue;
pub use structure::{AttributeDescriptor, DictionaryStructure, KeyColumn, KeyDeclaration};
