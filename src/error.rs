use crate::delivery::Disposition;
use thiserror::Error;

/// Broker-side failure. The consume loop cannot continue past any of these.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("delivery stream ended; broker channel or connection closed")]
    StreamEnded,
    #[error("delivery stream failed: {0}")]
    Stream(#[from] lapin::Error),
    #[error("failed to {disposition} delivery {delivery_tag}: {reason}")]
    Settle {
        delivery_tag: u64,
        disposition: Disposition,
        reason: String,
    },
}
