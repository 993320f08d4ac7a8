//! In-memory hashed dictionaries over Arrow data.
//!
//! A dictionary maps keys to typed attribute values, is loaded whole from a
//! [`DictionarySource`], and answers batched lookups from hash tables without ever
//! going back to the source. Keys are either plain `u64` values
//! ([`SimpleHashedDictionary`]) or composites of several typed columns matched as
//! opaque bytes ([`ComplexHashedDictionary`]). Loads can fan rows out across
//! shards built in parallel, attributes can be nullable with an explicit
//! null-or-absent distinction, and a `UInt64` parent attribute unlocks hierarchy
//! traversal.
//!
//! ```
//! use std::sync::Arc;
//!
//! use arrow::array::{Array, ArrayRef, StringArray, UInt64Array};
//! use arrow::datatypes::{DataType, Field, Schema};
//! use arrow::record_batch::RecordBatch;
//! use memdict::{
//!     AttributeDescriptor, DictionaryOptions, DictionaryStructure, MemorySource,
//!     ScalarValue, SimpleHashedDictionary, ValueKind,
//! };
//!
//! # fn main() -> memdict::Result<()> {
//! let schema = Arc::new(Schema::new(vec![
//!     Field::new("id", DataType::UInt64, false),
//!     Field::new("name", DataType::Utf8, true),
//! ]));
//! let rows = RecordBatch::try_new(
//!     schema,
//!     vec![
//!         Arc::new(UInt64Array::from(vec![1, 2, 3])) as ArrayRef,
//!         Arc::new(StringArray::from(vec![Some("alpha"), None, Some("gamma")])),
//!     ],
//! )?;
//!
//! let structure = DictionaryStructure::simple("names", "id").with_attribute(
//!     AttributeDescriptor::new("name", ValueKind::Utf8)
//!         .nullable()
//!         .with_default(ScalarValue::from("unknown")),
//! );
//! let dictionary = SimpleHashedDictionary::create(
//!     structure,
//!     DictionaryOptions::default(),
//!     Box::new(MemorySource::new(vec![rows])),
//! )?;
//!
//! let probe: Vec<ArrayRef> = vec![Arc::new(UInt64Array::from(vec![1, 2, 9]))];
//! let names = dictionary.get_column("name", &DataType::Utf8, &probe, None)?;
//! let names = names.as_any().downcast_ref::<StringArray>().unwrap();
//! assert_eq!(names.value(0), "alpha");
//! assert!(names.is_null(1)); // stored as null, distinct from absent
//! assert_eq!(names.value(2), "unknown"); // absent, declared default
//! # Ok(())
//! # }
//! ```

pub mod key;
pub mod router;
pub mod source;
pub mod store;

pub use memdict_result::{Error, Result};
pub use memdict_schema::{
    AttributeDescriptor, DictionaryLifetime, DictionaryOptions, DictionaryStructure, KeyColumn,
    KeyDeclaration, ScalarValue, TableLayout, ValueKind,
};
pub use source::{BatchStream, DictionarySource, MemorySource};
pub use store::{
    ComplexHashedDictionary, ContentsStream, HashedDictionary, SimpleHashedDictionary,
};
