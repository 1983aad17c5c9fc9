// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixture generation for metricset tests.
//!
//! Metricset tests call [`write_events`] to refresh the `_meta/data.json`
//! sample document shipped next to the metricset. The event is stamped with
//! fixed metadata so regenerated files only differ when the data changes.
//! Nothing is fetched or written unless `MB_UPDATE_DATA` is set to `1` or
//! `true`.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::ModuleError;
use crate::event::{add_metricset_info, Event, MetricSetEvent};
use crate::module::MetricSet;

/// Environment variable that opts into rewriting fixture files.
pub const DATA_ENV: &str = "MB_UPDATE_DATA";

const FIXTURE_HOSTNAME: &str = "host.example.com";
const FIXTURE_TOOK: Duration = Duration::from_micros(115);

/// Whether fixture files should be written.
pub fn data_enabled() -> bool {
    env::var(DATA_ENV)
        .map(|val| matches!(val.trim().to_lowercase().as_str(), "1" | "true"))
        .unwrap_or(false)
}

/// The fixed instant every fixture is stamped with.
pub fn fixture_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 10, 12, 8, 5, 34)
        .single()
        .unwrap_or_default()
        + chrono::Duration::milliseconds(853)
}

/// Fetches events and writes the first one to `<dir>/_meta/data.json`.
///
/// Returns `Ok(false)` when fixture generation is disabled.
pub async fn write_events(
    metric_set: &dyn MetricSet,
    module: &str,
    dir: &Path,
) -> Result<bool, ModuleError> {
    write_events_cond(metric_set, module, dir, |_| true).await
}

/// Fetches events and writes the first one matching `cond` to
/// `<dir>/_meta/data.json`.
pub async fn write_events_cond<F>(
    metric_set: &dyn MetricSet,
    module: &str,
    dir: &Path,
    cond: F,
) -> Result<bool, ModuleError>
where
    F: Fn(&MetricSetEvent) -> bool,
{
    if !data_enabled() {
        info!("{DATA_ENV} not set, skipping data generation for {module}/{}", metric_set.name());
        return Ok(false);
    }

    let events = metric_set.fetch().await?;
    if events.is_empty() {
        return Err(ModuleError::NoEvents);
    }

    let event = events
        .into_iter()
        .find(|e| cond(e))
        .ok_or(ModuleError::NoMatchingEvent)?;

    let event = standardize_event(metric_set, module, event);
    write_data_json(&event, dir)?;
    Ok(true)
}

/// Stamps a metricset event with the fixture metadata and converts it.
pub fn standardize_event(
    metric_set: &dyn MetricSet,
    module: &str,
    mut event: MetricSetEvent,
) -> Event {
    event.timestamp = Some(fixture_timestamp());
    event.took = Some(FIXTURE_TOOK);
    event.host = metric_set.host().map(str::to_string);
    if event.namespace.is_none() {
        event.namespace = metric_set.namespace().map(str::to_string);
    }

    let mut full_event = event.into_event(module, metric_set.name(), &[add_metricset_info]);
    full_event.put("beat.name", Value::from(FIXTURE_HOSTNAME));
    full_event.put("beat.hostname", Value::from(FIXTURE_HOSTNAME));
    full_event
}

/// Writes `event` to `<dir>/_meta/data.json` when fixture generation is
/// enabled, otherwise does nothing.
pub fn write_event_to_data_json(event: &Event, dir: &Path) -> Result<(), ModuleError> {
    if !data_enabled() {
        return Ok(());
    }
    write_data_json(event, dir).map(|_| ())
}

fn write_data_json(event: &Event, dir: &Path) -> Result<PathBuf, ModuleError> {
    let meta = dir.join("_meta");
    fs::create_dir_all(&meta)?;
    let path = meta.join("data.json");

    let mut output = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut output, PrettyFormatter::with_indent(b"    "));
    event.serialize(&mut serializer)?;

    fs::write(&path, output)?;
    debug!("Wrote fixture to {}", path.display());
    Ok(path)
}
