// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;

use crate::errors::ModuleError;
use crate::event::{Event, MetricSetEvent};

/// A unit of metrics collection driven by a [`crate::runner::Runner`].
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    /// Number of metricsets the module runs. Only used for diagnostics.
    fn metric_set_count(&self) -> usize;

    /// Starts producing events into the returned channel.
    ///
    /// Implementations must close the channel promptly once `done` is
    /// cancelled, and may close it earlier when they run out of work. Start
    /// cannot fail; a module that cannot run returns a closed channel.
    fn start(&self, done: CancellationToken) -> Receiver<Event>;
}

/// A single collector inside a module.
#[async_trait]
pub trait MetricSet: Send + Sync {
    fn name(&self) -> &str;

    /// Host the metricset collects from, if it talks to a remote service.
    fn host(&self) -> Option<&str> {
        None
    }

    /// Overrides where the metricset fields land in the published event.
    fn namespace(&self) -> Option<&str> {
        None
    }

    /// Collects one round of data.
    async fn fetch(&self) -> Result<Vec<MetricSetEvent>, ModuleError>;
}
