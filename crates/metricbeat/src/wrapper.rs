// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic module built from a set of metricsets.
//!
//! Every metricset gets its own task that fetches once immediately and then
//! on each period tick. All tasks write into one bounded channel, which is
//! the module output handed to the runner. The channel closes when the last
//! task exits, which happens as soon as the `done` token is cancelled.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::{add_metricset_info, Event, MetricSetEvent};
use crate::module::{MetricSet, Module};

/// Shortest fetch period; zero periods are raised to it.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

pub struct Wrapper {
    name: String,
    period: Duration,
    queue_size: usize,
    metric_sets: Vec<Arc<dyn MetricSet>>,
}

impl Wrapper {
    /// Creates a module without metricsets.
    ///
    /// # Arguments
    ///
    /// * `name` - Module name, used as the top level key of every event
    /// * `period` - Interval between two fetches of the same metricset, at
    ///   least [`MIN_PERIOD`]
    /// * `queue_size` - Capacity of the output channel
    pub fn new(name: impl Into<String>, period: Duration, queue_size: usize) -> Self {
        Self {
            name: name.into(),
            period: period.max(MIN_PERIOD),
            queue_size: queue_size.max(1),
            metric_sets: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_metric_set(mut self, metric_set: Arc<dyn MetricSet>) -> Self {
        self.metric_sets.push(metric_set);
        self
    }

    pub fn metric_sets(&self) -> &[Arc<dyn MetricSet>] {
        &self.metric_sets
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Module for Wrapper {
    fn name(&self) -> &str {
        &self.name
    }

    fn metric_set_count(&self) -> usize {
        self.metric_sets.len()
    }

    fn start(&self, done: CancellationToken) -> Receiver<Event> {
        let (tx, rx) = mpsc::channel(self.queue_size);

        for metric_set in &self.metric_sets {
            let runner = MetricSetRunner {
                module: self.name.clone(),
                metric_set: Arc::clone(metric_set),
                period: self.period,
                tx: tx.clone(),
                done: done.clone(),
            };
            tokio::spawn(runner.run());
        }

        // The output closes once every metricset task has dropped its sender.
        rx
    }
}

struct MetricSetRunner {
    module: String,
    metric_set: Arc<dyn MetricSet>,
    period: Duration,
    tx: Sender<Event>,
    done: CancellationToken,
}

impl MetricSetRunner {
    async fn run(self) {
        debug!("{}/{} metricset started", self.module, self.metric_set.name());

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.done.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.fetch_and_report().await {
                        break;
                    }
                }
            }
        }

        debug!("{}/{} metricset stopped", self.module, self.metric_set.name());
    }

    /// Runs one fetch and sends the resulting events. Returns false when the
    /// metricset should stop.
    async fn fetch_and_report(&self) -> bool {
        let timestamp = Utc::now();
        let started = Instant::now();
        let result = self.metric_set.fetch().await;
        let took = started.elapsed();

        let events = match result {
            Ok(events) => events,
            Err(e) => {
                warn!("{}/{} fetch failed: {e}", self.module, self.metric_set.name());
                vec![MetricSetEvent::from_error(e)]
            }
        };

        for event in events {
            let event = self.complete(event, timestamp, took);
            tokio::select! {
                biased;
                _ = self.done.cancelled() => return false,
                sent = self.tx.send(event) => {
                    if sent.is_err() {
                        debug!("{} output closed, stopping {}", self.module, self.metric_set.name());
                        return false;
                    }
                }
            }
        }
        true
    }

    fn complete(
        &self,
        mut event: MetricSetEvent,
        timestamp: chrono::DateTime<Utc>,
        took: Duration,
    ) -> Event {
        event.timestamp.get_or_insert(timestamp);
        event.took.get_or_insert(took);
        if event.host.is_none() {
            event.host = self.metric_set.host().map(str::to_string);
        }
        if event.namespace.is_none() {
            event.namespace = self.metric_set.namespace().map(str::to_string);
        }
        event.into_event(&self.module, self.metric_set.name(), &[add_metricset_info])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ModuleError;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMetricSet {
        fetches: AtomicUsize,
        fail: bool,
    }

    impl CountingMetricSet {
        fn new(fail: bool) -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl MetricSet for CountingMetricSet {
        fn name(&self) -> &str {
            "counter"
        }

        fn host(&self) -> Option<&str> {
            Some("localhost")
        }

        async fn fetch(&self) -> Result<Vec<MetricSetEvent>, ModuleError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ModuleError::fetch("counter", "unreachable"));
            }
            let mut fields = Map::new();
            fields.insert("n".to_string(), json!(n));
            Ok(vec![MetricSetEvent::with_metricset_fields(fields)])
        }
    }

    #[test]
    fn test_metric_set_count() {
        let wrapper = Wrapper::new("test", Duration::from_secs(1), 10)
            .with_metric_set(Arc::new(CountingMetricSet::new(false)))
            .with_metric_set(Arc::new(CountingMetricSet::new(false)));

        assert_eq!(wrapper.name(), "test");
        assert_eq!(wrapper.metric_set_count(), 2);
    }

    #[tokio::test]
    async fn test_fetches_immediately_and_stops_on_cancel() {
        let metric_set = Arc::new(CountingMetricSet::new(false));
        let wrapper =
            Wrapper::new("test", Duration::from_secs(3600), 10).with_metric_set(metric_set.clone());
        let done = CancellationToken::new();

        let mut rx = wrapper.start(done.clone());
        let event = rx.recv().await.expect("first fetch is immediate");

        assert_eq!(event.get("test.counter.n"), Some(&json!(0)));
        assert_eq!(event.get("metricset.name"), Some(&json!("counter")));
        assert_eq!(event.get("metricset.module"), Some(&json!("test")));
        assert_eq!(event.get("metricset.host"), Some(&json!("localhost")));

        done.cancel();
        assert!(rx.recv().await.is_none());
        assert_eq!(metric_set.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_becomes_error_event() {
        let wrapper = Wrapper::new("test", Duration::from_secs(3600), 10)
            .with_metric_set(Arc::new(CountingMetricSet::new(true)));
        let done = CancellationToken::new();

        let mut rx = wrapper.start(done.clone());
        let event = rx.recv().await.expect("error event");

        assert_eq!(
            event.get("error.message"),
            Some(&json!("Failed to fetch counter: unreachable"))
        );
        done.cancel();
    }

    #[tokio::test]
    async fn test_cancelled_before_start_produces_nothing() {
        let metric_set = Arc::new(CountingMetricSet::new(false));
        let wrapper =
            Wrapper::new("test", Duration::from_millis(1), 10).with_metric_set(metric_set.clone());
        let done = CancellationToken::new();
        done.cancel();

        let mut rx = wrapper.start(done);

        assert!(rx.recv().await.is_none());
        assert_eq!(metric_set.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_without_metric_sets_output_is_closed() {
        let wrapper = Wrapper::new("empty", Duration::from_secs(1), 10);

        let mut rx = wrapper.start(CancellationToken::new());

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_zero_period_is_clamped() {
        let metric_set = Arc::new(CountingMetricSet::new(false));
        let wrapper =
            Wrapper::new("test", Duration::ZERO, 4).with_metric_set(metric_set.clone());
        assert_eq!(wrapper.period(), MIN_PERIOD);

        let done = CancellationToken::new();
        let mut rx = wrapper.start(done.clone());
        for expected in 0..2 {
            let event = rx.recv().await.expect("metricset task keeps running");
            assert_eq!(event.get("test.counter.n"), Some(&json!(expected)));
        }

        done.cancel();
        while rx.recv().await.is_some() {}
        assert!(metric_set.fetches.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_every_period() {
        let metric_set = Arc::new(CountingMetricSet::new(false));
        let wrapper =
            Wrapper::new("test", Duration::from_secs(10), 10).with_metric_set(metric_set.clone());
        let done = CancellationToken::new();

        let mut rx = wrapper.start(done.clone());
        for expected in 0..3 {
            let event = rx.recv().await.expect("periodic event");
            assert_eq!(event.get("test.counter.n"), Some(&json!(expected)));
        }

        done.cancel();
        assert!(rx.recv().await.is_none());
    }
}
