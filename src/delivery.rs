//! Delivery handles and the per-message acknowledgement state machine.

use crate::error::ConnectionError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use std::fmt;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    Confirmed,
    Requeued,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the message from the queue for good.
    Confirm,
    /// Hand the message back to the queue for redelivery.
    Requeue,
    /// Drop the message, or dead-letter it if the queue has a DLX.
    Reject,
}

impl Disposition {
    pub fn settled_state(self) -> DeliveryState {
        match self {
            Disposition::Confirm => DeliveryState::Confirmed,
            Disposition::Requeue => DeliveryState::Requeued,
            Disposition::Reject => DeliveryState::Rejected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Confirm => "confirm",
            Disposition::Requeue => "requeue",
            Disposition::Reject => "reject",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker operations available on one in-flight delivery.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn confirm(&self) -> Result<()>;
    async fn requeue(&self) -> Result<()>;
    async fn reject(&self) -> Result<()>;
}

#[async_trait]
impl Acknowledge for Acker {
    async fn confirm(&self) -> Result<()> {
        self.ack(BasicAckOptions { multiple: false })
            .await
            .context("basic.ack")
    }

    async fn requeue(&self) -> Result<()> {
        self.nack(BasicNackOptions {
            multiple: false,
            requeue: true,
        })
        .await
        .context("basic.nack with requeue")
    }

    async fn reject(&self) -> Result<()> {
        self.nack(BasicNackOptions {
            multiple: false,
            requeue: false,
        })
        .await
        .context("basic.nack without requeue")
    }
}

/// Owns the right to settle one delivery.
///
/// `settle` takes the handle by value, so a delivery can be resolved at most
/// once. Dropping a handle that was never settled is reported, since the
/// broker will hold the message until the channel closes.
pub struct DeliveryHandle<A: Acknowledge> {
    delivery_tag: u64,
    acker: A,
    state: DeliveryState,
    settle_attempted: bool,
}

impl<A: Acknowledge> DeliveryHandle<A> {
    pub fn new(delivery_tag: u64, acker: A) -> Self {
        Self {
            delivery_tag,
            acker,
            state: DeliveryState::Received,
            settle_attempted: false,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// True until a settle call has been made for this delivery.
    pub fn unsettled(&self) -> bool {
        self.state == DeliveryState::Received && !self.settle_attempted
    }

    pub async fn settle(
        mut self,
        disposition: Disposition,
    ) -> std::result::Result<DeliveryState, ConnectionError> {
        self.settle_attempted = true;

        let result = match disposition {
            Disposition::Confirm => self.acker.confirm().await,
            Disposition::Requeue => self.acker.requeue().await,
            Disposition::Reject => self.acker.reject().await,
        };

        result.map_err(|error| ConnectionError::Settle {
            delivery_tag: self.delivery_tag,
            disposition,
            reason: format!("{error:#}"),
        })?;

        self.state = disposition.settled_state();
        Ok(self.state)
    }
}

impl<A: Acknowledge> Drop for DeliveryHandle<A> {
    fn drop(&mut self) {
        if self.unsettled() {
            error!(
                delivery_tag = self.delivery_tag,
                "delivery handle dropped without confirm or requeue"
            );
        }
    }
}

impl<A: Acknowledge> fmt::Debug for DeliveryHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("delivery_tag", &self.delivery_tag)
            .field("state", &self.state)
            .finish()
    }
}

/// A raw message pulled from the queue, paired with its handle.
#[derive(Debug)]
pub struct Incoming<A: Acknowledge> {
    pub payload: Vec<u8>,
    pub redelivered: bool,
    pub handle: DeliveryHandle<A>,
}

impl From<Delivery> for Incoming<Acker> {
    fn from(delivery: Delivery) -> Self {
        Self {
            handle: DeliveryHandle::new(delivery.delivery_tag, delivery.acker),
            redelivered: delivery.redelivered,
            payload: delivery.data,
        }
    }
}
