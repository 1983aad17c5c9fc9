// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle coordinator for a single module.
//!
//! A [`Runner`] starts a [`Module`] once, forwards everything it produces to a
//! [`Publisher`] from one background task, and stops it once.
//!
//! # Shutdown
//!
//! The first [`Runner::stop`] call:
//! 1. Cancels the module's `done` token
//! 2. Closes the publisher
//! 3. Waits for the forwarding task to drain the module output
//!
//! The publisher is closed before the forwarding task is joined, so events
//! the module emitted before it observed cancellation may still reach a
//! closing publisher. Publishers are required to tolerate that.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::module::Module;
use crate::publisher::{publish_channel, Publisher};

/// Lifecycle state of a [`Runner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Unstarted,
    Running,
    Stopped,
}

#[derive(Debug, Default)]
struct Guards {
    started: bool,
    stopped: bool,
}

/// Starts and stops a [`Module`], publishing its events.
pub struct Runner {
    done: CancellationToken,
    tracker: TaskTracker,
    guards: Mutex<Guards>,
    module: Arc<dyn Module>,
    client: Arc<dyn Publisher>,
}

impl Runner {
    /// Binds a module to the publisher that receives its events. The runner
    /// owns both for the rest of its life.
    pub fn new(client: Arc<dyn Publisher>, module: Arc<dyn Module>) -> Self {
        Self {
            done: CancellationToken::new(),
            tracker: TaskTracker::new(),
            guards: Mutex::new(Guards::default()),
            module,
            client,
        }
    }

    /// Starts the module and the task forwarding its events. Only the first
    /// call has an effect.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut guards = self.guards.lock().unwrap_or_else(PoisonError::into_inner);
        if guards.started {
            return;
        }
        guards.started = true;

        debug!("Starting {self}");
        let output = self.module.start(self.done.clone());
        let client = Arc::clone(&self.client);
        self.tracker.spawn(publish_channel(client, output));
    }

    /// Stops the module, closes the publisher and waits until every event the
    /// module emitted has been handed to the publisher.
    ///
    /// Only the first call cancels and closes, but every call waits for the
    /// forwarding task to finish. Stopping a runner that was never started is
    /// allowed; a later [`Runner::start`] hands the module a cancelled token.
    pub async fn stop(&self) {
        {
            let mut guards = self.guards.lock().unwrap_or_else(PoisonError::into_inner);
            if !guards.stopped {
                guards.stopped = true;

                debug!("Stopping {self}");
                self.done.cancel();
                if let Err(e) = self.client.close() {
                    warn!("Error closing publisher for {self}: {e}");
                }
                self.tracker.close();
            }
        }

        self.tracker.wait().await;
        debug!("Stopped {self}");
    }

    pub fn state(&self) -> RunnerState {
        let guards = self.guards.lock().unwrap_or_else(PoisonError::into_inner);
        if guards.stopped {
            RunnerState::Stopped
        } else if guards.started {
            RunnerState::Running
        } else {
            RunnerState::Unstarted
        }
    }
}

impl fmt::Display for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [metricsets={}]",
            self.module.name(),
            self.module.metric_set_count()
        )
    }
}
