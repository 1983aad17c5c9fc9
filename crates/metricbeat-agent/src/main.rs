// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod cpu;

use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use metricbeat::{
    config::AgentConfig,
    event::Event,
    module::MetricSet,
    publisher::ChannelPublisher,
    runner::Runner,
    wrapper::Wrapper,
};

#[tokio::main]
pub async fn main() {
    let config = match AgentConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading metricbeat agent configuration: {e}");
            return;
        }
    };

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let mut wrapper = Wrapper::new(config.module.clone(), config.period, config.queue_size);
    for name in &config.metricsets {
        match build_metric_set(&config.module, name) {
            Some(metric_set) => wrapper = wrapper.with_metric_set(metric_set),
            None => warn!("Unknown metricset {}/{name}, skipping", config.module),
        }
    }
    if wrapper.metric_sets().is_empty() {
        error!("No metricsets enabled for module {}. Shutting down.", config.module);
        return;
    }

    let (publisher, events) = ChannelPublisher::new(config.queue_size);
    let publisher = Arc::new(publisher);
    let output = tokio::spawn(write_events(events));

    let runner = Runner::new(publisher.clone(), Arc::new(wrapper));
    info!("Starting module {runner}, period {:?}", config.period);
    runner.start();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }

    info!("Stopping module {runner}");
    runner.stop().await;

    if let Err(e) = output.await {
        error!("Event output task failed: {e}");
    }
    info!(
        "Module stopped, {} events published, {} dropped",
        publisher.published(),
        publisher.dropped()
    );
}

fn build_metric_set(module: &str, name: &str) -> Option<Arc<dyn MetricSet>> {
    match (module, name) {
        ("system", cpu::NAME) => Some(Arc::new(cpu::CpuMetricSet::default())),
        _ => None,
    }
}

/// Writes each event as one JSON line on stdout until the publisher closes.
async fn write_events(mut events: Receiver<Event>) {
    let stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize event: {e}");
                continue;
            }
        };
        let mut handle = stdout.lock();
        if let Err(e) = writeln!(handle, "{line}") {
            error!("Failed to write event: {e}");
        }
    }
    debug!("Event output closed");
}
