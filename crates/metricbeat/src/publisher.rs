// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, trace};

use crate::errors::PublishError;
use crate::event::Event;

/// Destination for the events produced by a module.
///
/// `publish` may still be called while or after `close` runs; implementations
/// have to tolerate that without corrupting their state.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Hands one event over for delivery. Delivery failures are the
    /// publisher's own concern.
    async fn publish(&self, event: Event);

    /// Releases the publisher resources.
    fn close(&self) -> Result<(), PublishError>;
}

/// Forwards every event received on `output` to `client` until the channel
/// is closed.
pub async fn publish_channel(client: Arc<dyn Publisher>, mut output: Receiver<Event>) {
    while let Some(event) = output.recv().await {
        client.publish(event).await;
    }
}

/// Publisher that hands events to a bounded tokio channel.
///
/// Events published after [`Publisher::close`] are dropped and counted.
pub struct ChannelPublisher {
    tx: Mutex<Option<Sender<Event>>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl ChannelPublisher {
    /// Creates a publisher and the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let publisher = Self {
            tx: Mutex::new(Some(tx)),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        };
        (publisher, rx)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn sender(&self) -> Option<Sender<Event>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(&self, event: Event) {
        let Some(tx) = self.sender() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Publisher closed, dropping event");
            return;
        };

        match tx.send(event).await {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                trace!("Event published");
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Event receiver dropped, dropping event");
            }
        }
    }

    fn close(&self) -> Result<(), PublishError> {
        match self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(_) => {
                debug!("Publisher closed");
                Ok(())
            }
            None => Err(PublishError::AlreadyClosed),
        }
    }
}
