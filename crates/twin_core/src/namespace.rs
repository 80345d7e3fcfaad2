//! Flat telemetry namespace (`<owner>.<field>` → value).
//!
//! One namespace per line, passed explicitly to everything that publishes.
//! Only value changes are recorded, which is what the protocol layer pushes.

use ahash::AHashMap;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::TelemetryValue;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryChange {
    pub key: String,
    pub value: TelemetryValue,
}

#[derive(Debug, Default)]
pub struct Namespace {
    values: AHashMap<String, TelemetryValue>,
    changes: Vec<TelemetryChange>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `<owner>.<field>`. Returns true when the stored value changed.
    pub fn publish(&mut self, owner: &str, field: &str, value: impl Into<TelemetryValue>) -> bool {
        self.publish_key(format!("{owner}.{field}"), value.into())
    }

    pub fn publish_key(&mut self, key: String, value: TelemetryValue) -> bool {
        if self.values.get(&key) == Some(&value) {
            return false;
        }
        self.changes.push(TelemetryChange {
            key: key.clone(),
            value: value.clone(),
        });
        self.values.insert(key, value);
        true
    }

    pub fn get(&self, owner: &str, field: &str) -> Option<&TelemetryValue> {
        self.values.get(&format!("{owner}.{field}"))
    }

    pub fn get_key(&self, key: &str) -> Option<&TelemetryValue> {
        self.values.get(key)
    }

    pub fn contains_owner(&self, owner: &str) -> bool {
        let prefix = format!("{owner}.");
        self.values.keys().any(|k| k.starts_with(&prefix))
    }

    /// Drain the changes recorded since the last call.
    pub fn take_changes(&mut self) -> Vec<TelemetryChange> {
        std::mem::take(&mut self.changes)
    }

    /// Sorted copy of every value, for snapshots.
    pub fn snapshot(&self) -> BTreeMap<String, TelemetryValue> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
