//! Free-form attribute dictionary attached to features and shapes.
//!
//! Keys are unique and keep insertion order for display. All edits go through
//! [`AttributeEdit`] so that a rename onto an existing key is rejected instead
//! of silently overwriting the value stored there.
//!
//! Values are edited as text. A value loaded as a non-string JSON value
//! (number, boolean, null, array, object) is written back as that same value
//! until its text is changed.

use std::fmt;

use log::warn;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::warning::ReconcileWarning;

/// Prefix of keys generated by [`AttributeEdit::Add`].
pub const NEW_KEY_PREFIX: &str = "new_";

/// Attribute edit errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
    #[error("attribute key {key:?} already exists")]
    Collision { key: String },
}

/// A single edit on an attribute map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeEdit {
    /// Insert a generated key with an empty value.
    Add,
    /// Rename a key, keeping its value and position.
    Rename { from: String, to: String },
    /// Replace the value of an existing key.
    SetValue { key: String, value: String },
    /// Remove a key.
    Remove { key: String },
}

/// What an applied edit changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeChange {
    Added(String),
    Renamed,
    Updated,
    Removed,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: String,
    text: String,
    /// Stored value when it was not a JSON string; dropped once the text changes.
    original: Option<Value>,
}

impl Entry {
    fn text(key: String, text: String) -> Self {
        Self {
            key,
            text,
            original: None,
        }
    }

    fn from_value(key: String, value: Value) -> Self {
        match value {
            Value::String(text) => Self::text(key, text),
            Value::Null => Self {
                key,
                text: String::new(),
                original: Some(Value::Null),
            },
            other => Self {
                key,
                text: other.to_string(),
                original: Some(other),
            },
        }
    }

    fn value(&self) -> Value {
        match &self.original {
            Some(value) => value.clone(),
            None => Value::String(self.text.clone()),
        }
    }

    fn set_text(&mut self, text: String) {
        self.text = text;
        self.original = None;
    }
}

/// Ordered string-to-string map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap {
    entries: Vec<Entry>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|i| self.entries[i].text.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Entries in display order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|e| (e.key.as_str(), e.text.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    /// Insert or replace a value, returning the previous one.
    ///
    /// This is the loading path; interactive edits use [`AttributeMap::apply`].
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(i) => {
                let previous = std::mem::take(&mut self.entries[i].text);
                self.entries[i].set_text(value);
                Some(previous)
            }
            None => {
                self.entries.push(Entry::text(key, value));
                None
            }
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    /// Validate and apply an edit.
    ///
    /// A failed edit leaves the map untouched.
    pub fn apply(&mut self, edit: AttributeEdit) -> Result<AttributeChange, AttributeError> {
        match edit {
            AttributeEdit::Add => Ok(AttributeChange::Added(self.add())),
            AttributeEdit::Rename { from, to } => self.rename(&from, &to),
            AttributeEdit::SetValue { key, value } => Ok(self.set_value(&key, value)),
            AttributeEdit::Remove { key } => Ok(self.remove(&key)),
        }
    }

    /// Insert `new_<n>` with an empty value, where `n` starts at the current
    /// key count and is bumped until the key is free.
    pub fn add(&mut self) -> String {
        let mut n = self.entries.len();
        let key = loop {
            let candidate = format!("{NEW_KEY_PREFIX}{n}");
            if !self.contains_key(&candidate) {
                break candidate;
            }
            n += 1;
        };
        self.entries.push(Entry::text(key.clone(), String::new()));
        key
    }

    /// Rename `from` to `to`.
    ///
    /// Renaming onto an existing key is rejected. Renaming a missing key or
    /// renaming a key to itself changes nothing.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<AttributeChange, AttributeError> {
        if from == to {
            return Ok(AttributeChange::Unchanged);
        }
        let Some(i) = self.position(from) else {
            return Ok(AttributeChange::Unchanged);
        };
        if self.contains_key(to) {
            return Err(AttributeError::Collision { key: to.to_string() });
        }
        self.entries[i].key = to.to_string();
        Ok(AttributeChange::Renamed)
    }

    /// Update the value at `key`; a missing key is ignored.
    pub fn set_value(&mut self, key: &str, value: impl Into<String>) -> AttributeChange {
        match self.position(key) {
            Some(i) => {
                self.entries[i].set_text(value.into());
                AttributeChange::Updated
            }
            None => AttributeChange::Unchanged,
        }
    }

    /// Remove `key`; a missing key is ignored.
    pub fn remove(&mut self, key: &str) -> AttributeChange {
        match self.position(key) {
            Some(i) => {
                self.entries.remove(i);
                AttributeChange::Removed
            }
            None => AttributeChange::Unchanged,
        }
    }

    /// Parse a stored attribute blob.
    ///
    /// Blank input is an empty map. Malformed input also yields an empty map,
    /// together with a warning for the caller to surface.
    pub fn parse_lenient(text: &str) -> (Self, Option<ReconcileWarning>) {
        if text.trim().is_empty() {
            return (Self::new(), None);
        }
        match serde_json::from_str::<AttributeMap>(text) {
            Ok(map) => (map, None),
            Err(e) => {
                let warning = ReconcileWarning::ParseFailure {
                    what: "attributes",
                    message: e.to_string(),
                };
                warn!("{warning}");
                (Self::new(), Some(warning))
            }
        }
    }

    /// Stored JSON value of `key`: the loaded value if it was not a string
    /// and has not been edited, else the text.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.position(key).map(|i| self.entries[i].value())
    }

    /// Serialize to the stored blob format (a JSON object).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for AttributeMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            match &entry.original {
                Some(value) => map.serialize_entry(&entry.key, value)?,
                None => map.serialize_entry(&entry.key, &entry.text)?,
            }
        }
        map.end()
    }
}

struct AttributeMapVisitor;

impl<'de> Visitor<'de> for AttributeMapVisitor {
    type Value = AttributeMap;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object or null")
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(AttributeMap::new())
    }

    fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(AttributeMap::new())
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(AttributeMapVisitor)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = AttributeMap::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            let entry = Entry::from_value(key, value);
            match map.position(&entry.key) {
                Some(i) => map.entries[i] = entry,
                None => map.entries.push(entry),
            }
        }
        Ok(map)
    }
}

impl<'de> Deserialize<'de> for AttributeMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_option(AttributeMapVisitor)
    }
}
