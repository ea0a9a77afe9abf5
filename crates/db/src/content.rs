//! Content typing and natural keys.
//!
//! Content units are plugin-defined. Each concrete type declares a tag and the
//! list of fields that together identify a unit of that type (its natural
//! key); two units of the same type with equal natural keys are the same unit.
//! The [`ContentTypes`] registry maps tags to field lists so the pipeline can
//! resolve units it only knows as trait objects.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Static description of a content type.
pub trait ContentType {
    /// Tag stored alongside every unit, e.g. `"file.file"`.
    const TYPE: &'static str;
    /// Fields whose combined values uniquely identify a unit of this type.
    const NATURAL_KEY: &'static [&'static str];
}

/// A candidate content unit that has not necessarily been saved yet.
///
/// Object safe, so a single pipeline can carry units of many types.
pub trait Content: fmt::Debug + Send + Sync {
    fn content_type(&self) -> &'static str;

    /// Natural key field values. Must cover exactly the registered fields.
    fn natural_key(&self) -> NaturalKey;

    /// Remaining (non-identifying) attributes persisted with the unit.
    fn attributes(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Field name to value map identifying a content unit.
///
/// Backed by a [`BTreeMap`], so its JSON encoding is canonical: equal keys
/// always serialize to identical text, which is what the store compares.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NaturalKey(BTreeMap<String, String>);

impl NaturalKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// True when every listed field is present in both keys with equal values.
    pub fn matches_on(&self, other: &NaturalKey, fields: &[&str]) -> bool {
        fields.iter().all(|field| match (self.get(field), other.get(field)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        })
    }

    pub(crate) fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.0).or_raise(|| ErrorKind::InvalidData("natural key"))
    }

    pub(crate) fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).or_raise(|| ErrorKind::InvalidData("natural key"))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for NaturalKey {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, value) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{field}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// Registry of known content types and their natural-key fields.
#[derive(Debug, Clone, Default)]
pub struct ContentTypes {
    types: HashMap<&'static str, &'static [&'static str]>,
}

impl ContentTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the content types that ship with ferry.
    pub fn builtin() -> Self {
        Self::new().register::<FileContent>()
    }

    pub fn register<T: ContentType>(mut self) -> Self {
        self.types.insert(T::TYPE, T::NATURAL_KEY);
        self
    }

    /// Natural-key fields of a registered type.
    pub fn natural_key_fields(&self, content_type: &str) -> Result<&'static [&'static str]> {
        match self.types.get(content_type).copied() {
            Some(fields) => Ok(fields),
            None => exn::bail!(ErrorKind::UnknownContentType(content_type.to_string())),
        }
    }

    pub fn contains(&self, content_type: &str) -> bool {
        self.types.contains_key(content_type)
    }
}

/// A single file identified by its path and sha256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub relative_path: String,
    pub digest: String,
}

impl FileContent {
    pub fn new(relative_path: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            digest: digest.into(),
        }
    }
}

impl ContentType for FileContent {
    const TYPE: &'static str = "file.file";
    const NATURAL_KEY: &'static [&'static str] = &["relative_path", "digest"];
}

impl Content for FileContent {
    fn content_type(&self) -> &'static str {
        Self::TYPE
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::new()
            .with("relative_path", &self.relative_path)
            .with("digest", &self.digest)
    }
}
