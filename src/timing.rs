//! Resource timing normalization.
//!
//! A raw timing entry is whatever the host observed for one resource load, as a JSON object
//! (think `PerformanceResourceTiming`). Normalizing it:
//!
//! 1. keeps only number and string fields, dropping nested, boolean and null values;
//! 2. removes the [`EXCLUDED_PROPS`] denylist;
//! 3. rewrites every key from mixed case to underscore-separated form.
//!
//! The input is never mutated.

use serde_json::{Map, Value};

use crate::macros::record;

/// A raw timing observation.
pub type TimingEntry = Map<String, Value>;

/// Fields that are redundant or have no place in the beacon schema.
pub const EXCLUDED_PROPS: [&str; 3] = ["name", "initiatorType", "entryType"];

/// A flat, serializable timing record with underscore-separated keys.
#[record]
#[derive(Default)]
#[serde(transparent)]
pub struct NormalizedTiming(pub Map<String, Value>);

impl NormalizedTiming {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

pub fn normalize_entry(entry: &TimingEntry) -> NormalizedTiming {
    let primitives = clone_entry(entry);
    let kept = remove_entry_props(&primitives, &EXCLUDED_PROPS);
    NormalizedTiming(normalize_entry_keys(&kept))
}

/// Copy only the number- and string-valued fields.
pub fn clone_entry(entry: &TimingEntry) -> TimingEntry {
    entry
        .iter()
        .filter(|(_, value)| matches!(value, Value::Number(_) | Value::String(_)))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

pub fn remove_entry_props(entry: &TimingEntry, props: &[&str]) -> TimingEntry {
    entry
        .iter()
        .filter(|(key, _)| !props.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

pub fn normalize_entry_keys(entry: &TimingEntry) -> TimingEntry {
    entry
        .iter()
        .map(|(key, value)| (camel_to_snake(key), value.clone()))
        .collect()
}

/// `workerStart` -> `worker_start`. Keys that are already lower case are unchanged.
pub fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
