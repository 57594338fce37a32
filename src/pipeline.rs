//! Decode, forward and settle one delivery.

use crate::delivery::{Acknowledge, DeliveryState, Disposition, Incoming};
use crate::error::ConnectionError;
use crate::forwarder::{ForwardError, ObservationSink};
use relay_core::codec::{self, DecodeError};
use std::str::FromStr;
use tracing::{info, warn};

/// What to do with a delivery that could not be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureAction {
    #[default]
    Requeue,
    Reject,
}

impl FailureAction {
    pub fn disposition(self) -> Disposition {
        match self {
            FailureAction::Requeue => Disposition::Requeue,
            FailureAction::Reject => Disposition::Reject,
        }
    }
}

impl FromStr for FailureAction {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "requeue" => Ok(FailureAction::Requeue),
            "reject" => Ok(FailureAction::Reject),
            _ => Err("expected `requeue` or `reject`"),
        }
    }
}

/// Per-failure-class dispositions.
///
/// The default requeues every failure. A payload that never decodes is then
/// redelivered forever; set `on_decode_error` to `Reject` to drop it, or to
/// dead-letter it when the queue is declared with a dead-letter exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FailurePolicy {
    pub on_decode_error: FailureAction,
    pub on_forward_error: FailureAction,
}

#[derive(Debug)]
pub enum Outcome {
    Forwarded,
    DecodeFailed(DecodeError),
    ForwardFailed(ForwardError),
}

impl FailurePolicy {
    pub fn disposition_for(&self, outcome: &Outcome) -> Disposition {
        match outcome {
            Outcome::Forwarded => Disposition::Confirm,
            Outcome::DecodeFailed(_) => self.on_decode_error.disposition(),
            Outcome::ForwardFailed(_) => self.on_forward_error.disposition(),
        }
    }
}

pub struct Pipeline<S> {
    sink: S,
    policy: FailurePolicy,
}

impl<S: ObservationSink> Pipeline<S> {
    pub fn new(sink: S, policy: FailurePolicy) -> Self {
        Self { sink, policy }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Decodes and forwards a payload without touching the broker.
    pub async fn classify(&self, payload: &[u8]) -> Outcome {
        let observation = match codec::decode(payload) {
            Ok(observation) => observation,
            Err(error) => return Outcome::DecodeFailed(error),
        };

        info!(
            source = %observation.source,
            city = %observation.city,
            timestamp = %observation.timestamp,
            temperature_c = observation.temperature_c,
            optional = ?observation.present_optional_fields(),
            "observation received"
        );

        match self.sink.forward(&observation).await {
            Ok(()) => Outcome::Forwarded,
            Err(error) => Outcome::ForwardFailed(error),
        }
    }

    pub async fn process<A: Acknowledge>(
        &self,
        incoming: Incoming<A>,
    ) -> Result<DeliveryState, ConnectionError> {
        let Incoming {
            payload,
            redelivered,
            handle,
        } = incoming;
        let delivery_tag = handle.delivery_tag();

        let outcome = self.classify(&payload).await;
        let disposition = self.policy.disposition_for(&outcome);

        match &outcome {
            Outcome::Forwarded => {}
            Outcome::DecodeFailed(error) => warn!(
                delivery_tag,
                redelivered,
                payload_bytes = payload.len(),
                position = ?error.position(),
                error = %error,
                disposition = %disposition,
                "payload could not be decoded"
            ),
            Outcome::ForwardFailed(error) => warn!(
                delivery_tag,
                redelivered,
                error = %error,
                disposition = %disposition,
                "forwarding to ingestion api failed"
            ),
        }

        let state = handle.settle(disposition).await?;
        info!(delivery_tag, redelivered, state = ?state, "delivery settled");
        Ok(state)
    }
}
