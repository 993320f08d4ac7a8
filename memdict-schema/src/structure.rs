//! Dictionary structure: key shape and attribute declarations.

use memdict_result::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::kind::ValueKind;
use crate::scalar::ScalarValue;

/// One declared attribute of a dictionary.
///
/// The descriptor fixes the attribute's type for the lifetime of the dictionary and
/// carries the per-attribute behavior flags: whether null values are representable,
/// whether the attribute holds parent keys for hierarchy traversal, and whether the
/// key-to-value mapping is injective (a planner hint, not enforced by the engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    pub kind: ValueKind,
    /// When set, source rows may carry null for this attribute and lookups report
    /// null back for those keys.
    pub nullable: bool,
    /// When set, values of this attribute are parent keys. At most one attribute per
    /// dictionary may be hierarchical and it must be a non-nullable `UInt64`.
    pub hierarchical: bool,
    /// Declared one-to-one hint for planners that want to strip round-trip lookups.
    pub injective: bool,
    /// Value reported for keys the dictionary does not contain when the caller
    /// supplies no per-row defaults.
    pub default: Option<ScalarValue>,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            hierarchical: false,
            injective: false,
            default: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn hierarchical(mut self) -> Self {
        self.hierarchical = true;
        self
    }

    pub fn injective(mut self) -> Self {
        self.injective = true;
        self
    }

    pub fn with_default(mut self, default: ScalarValue) -> Self {
        self.default = Some(default);
        self
    }
}

/// One column of a complex key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyColumn {
    pub name: String,
    pub kind: ValueKind,
}

impl KeyColumn {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Declared key shape of a dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyDeclaration {
    /// Single `UInt64` key column.
    Simple { column: String },
    /// Composite key over one or more typed columns, matched as opaque bytes.
    Complex { columns: Vec<KeyColumn> },
}

/// Full declaration of a dictionary: its name, key shape, and attributes.
///
/// A structure with no attributes is legal and produces an existence-only dictionary
/// that answers key-membership probes but has nothing to gather.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryStructure {
    pub name: String,
    pub key: KeyDeclaration,
    pub attributes: Vec<AttributeDescriptor>,
}

impl DictionaryStructure {
    /// Structure with a single `UInt64` key column and no attributes yet.
    pub fn simple(name: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: KeyDeclaration::Simple {
                column: key_column.into(),
            },
            attributes: Vec::new(),
        }
    }

    /// Structure keyed by a composite of typed columns, no attributes yet.
    pub fn complex(name: impl Into<String>, columns: Vec<KeyColumn>) -> Self {
        Self {
            name: name.into(),
            key: KeyDeclaration::Complex { columns },
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeDescriptor) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Index of the attribute with the given name.
    pub fn attribute_index(&self, name: &str) -> Result<usize> {
        self.attributes
            .iter()
            .position(|attr| attr.name == name)
            .ok_or_else(|| {
                Error::Config(format!(
                    "dictionary `{}` has no attribute named `{name}`",
                    self.name
                ))
            })
    }

    /// Index of the hierarchical attribute, if one is declared.
    pub fn hierarchical_attribute_index(&self) -> Option<usize> {
        self.attributes.iter().position(|attr| attr.hierarchical)
    }

    /// Names of the key columns in declaration order.
    pub fn key_column_names(&self) -> Vec<&str> {
        match &self.key {
            KeyDeclaration::Simple { column } => vec![column.as_str()],
            KeyDeclaration::Complex { columns } => {
                columns.iter().map(|col| col.name.as_str()).collect()
            }
        }
    }

    /// Check the whole declaration for internal consistency.
    ///
    /// The engine calls this once before loading; everything downstream assumes a
    /// validated structure.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("dictionary name must not be empty".into()));
        }

        match &self.key {
            KeyDeclaration::Simple { column } => {
                if column.is_empty() {
                    return Err(Error::Config(format!(
                        "dictionary `{}`: key column name must not be empty",
                        self.name
                    )));
                }
            }
            KeyDeclaration::Complex { columns } => {
                if columns.is_empty() {
                    return Err(Error::Config(format!(
                        "dictionary `{}`: complex key needs at least one column",
                        self.name
                    )));
                }
                for (idx, col) in columns.iter().enumerate() {
                    if col.name.is_empty() {
                        return Err(Error::Config(format!(
                            "dictionary `{}`: complex key column {idx} has an empty name",
                            self.name
                        )));
                    }
                    col.kind.validate()?;
                    if !col.kind.supports_key_column() {
                        return Err(Error::Config(format!(
                            "dictionary `{}`: key column `{}` has kind {:?}, which cannot \
                             form part of a key",
                            self.name, col.name, col.kind
                        )));
                    }
                    if columns[..idx].iter().any(|prev| prev.name == col.name) {
                        return Err(Error::Config(format!(
                            "dictionary `{}`: duplicate key column `{}`",
                            self.name, col.name
                        )));
                    }
                }
            }
        }

        let mut hierarchical = 0usize;
        for (idx, attr) in self.attributes.iter().enumerate() {
            if attr.name.is_empty() {
                return Err(Error::Config(format!(
                    "dictionary `{}`: attribute {idx} has an empty name",
                    self.name
                )));
            }
            if self.attributes[..idx].iter().any(|prev| prev.name == attr.name) {
                return Err(Error::Config(format!(
                    "dictionary `{}`: duplicate attribute `{}`",
                    self.name, attr.name
                )));
            }
            attr.kind.validate()?;
            if let Some(default) = &attr.default
                && !default.matches_kind(&attr.kind)
            {
                return Err(Error::Config(format!(
                    "dictionary `{}`: default for attribute `{}` does not match its \
                     declared kind {:?}",
                    self.name, attr.name, attr.kind
                )));
            }
            if attr.hierarchical {
                hierarchical += 1;
                if attr.kind != ValueKind::UInt64 || attr.nullable {
                    return Err(Error::Config(format!(
                        "dictionary `{}`: hierarchical attribute `{}` must be a \
                         non-nullable UInt64",
                        self.name, attr.name
                    )));
                }
                if !matches!(self.key, KeyDeclaration::Simple { .. }) {
                    return Err(Error::Config(format!(
                        "dictionary `{}`: hierarchy requires a simple UInt64 key",
                        self.name
                    )));
                }
            }
        }
        if hierarchical > 1 {
            return Err(Error::Config(format!(
                "dictionary `{}`: at most one attribute may be hierarchical",
                self.name
            )));
        }

        Ok(())
    }
}
