// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event types exchanged between modules and publishers.
//!
//! A metricset reports [`MetricSetEvent`]s: loosely structured data plus the
//! metadata collected while fetching it. Before leaving the module every
//! metricset event is converted into an [`Event`], the flat document that
//! publishers ship. The runner never looks inside an [`Event`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Namespace that places metricset fields at the root of the event.
pub const ROOT_NAMESPACE: &str = ".";

/// A published event: a timestamp and a tree of fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, fields: Map<String, Value>) -> Self {
        Self { timestamp, fields }
    }

    /// Sets `value` at a dotted `path`, creating intermediate objects.
    pub fn put(&mut self, path: &str, value: Value) {
        put_path(&mut self.fields, path, value);
    }

    /// Looks up the value stored at a dotted `path`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.fields.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

/// Mutates a metricset event before it is converted, given the module and
/// metricset names.
pub type EventModifier = fn(&str, &str, &mut MetricSetEvent);

/// Data reported by a single metricset fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSetEvent {
    /// Fields merged at the top level of the published event.
    pub root_fields: Map<String, Value>,
    /// Fields stored under the module name.
    pub module_fields: Map<String, Value>,
    /// Fields stored under `<module>.<metricset>` or under `namespace`.
    pub metricset_fields: Map<String, Value>,
    pub namespace: Option<String>,
    pub host: Option<String>,
    /// Round-trip time of the fetch that produced the event.
    pub took: Option<Duration>,
    pub timestamp: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl MetricSetEvent {
    pub fn with_metricset_fields(fields: Map<String, Value>) -> Self {
        Self {
            metricset_fields: fields,
            ..Default::default()
        }
    }

    pub fn from_error(error: impl std::fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Converts the metricset data into a publishable [`Event`].
    ///
    /// Modifiers run first, in order. A missing timestamp defaults to now.
    pub fn into_event(
        mut self,
        module: &str,
        metric_set: &str,
        modifiers: &[EventModifier],
    ) -> Event {
        for modify in modifiers {
            modify(module, metric_set, &mut self);
        }

        let mut fields = self.root_fields;

        if !self.module_fields.is_empty() {
            put_path(&mut fields, module, Value::Object(self.module_fields));
        }

        if !self.metricset_fields.is_empty() {
            match self.namespace.as_deref() {
                Some(ROOT_NAMESPACE) => deep_update(&mut fields, self.metricset_fields),
                Some(namespace) if !namespace.is_empty() => {
                    put_path(&mut fields, namespace, Value::Object(self.metricset_fields))
                }
                _ => put_path(
                    &mut fields,
                    &format!("{module}.{metric_set}"),
                    Value::Object(self.metricset_fields),
                ),
            }
        }

        if let Some(error) = self.error {
            put_path(&mut fields, "error.message", Value::String(error));
        }

        Event {
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            fields,
        }
    }
}

/// Adds the `metricset` block describing where the event came from.
pub fn add_metricset_info(module: &str, metric_set: &str, event: &mut MetricSetEvent) {
    let mut info = Map::new();
    info.insert("name".to_string(), Value::from(metric_set));
    info.insert("module".to_string(), Value::from(module));
    if let Some(host) = event.host.as_deref().filter(|h| !h.is_empty()) {
        info.insert("host".to_string(), Value::from(host));
    }
    if let Some(took) = event.took.filter(|t| !t.is_zero()) {
        // rtt is reported in microseconds
        info.insert("rtt".to_string(), Value::from(took.as_micros() as u64));
    }
    if let Some(namespace) = event.namespace.as_deref().filter(|n| !n.is_empty()) {
        info.insert("namespace".to_string(), Value::from(namespace));
    }

    let mut update = Map::new();
    update.insert("metricset".to_string(), Value::Object(info));
    deep_update(&mut event.root_fields, update);
}

fn put_path(fields: &mut Map<String, Value>, path: &str, value: Value) {
    let mut current = fields;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
}

fn deep_update(target: &mut Map<String, Value>, update: Map<String, Value>) {
    for (key, value) in update {
        let Value::Object(incoming) = value else {
            target.insert(key, value);
            continue;
        };
        if let Some(Value::Object(existing)) = target.get_mut(&key) {
            deep_update(existing, incoming);
            continue;
        }
        target.insert(key, Value::Object(incoming));
    }
}
