//! JSON wire format shared by the queue payload and the ingestion API body.

use crate::model::Observation;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("malformed observation payload: {source}")]
pub struct DecodeError {
    #[from]
    source: serde_json::Error,
}

impl DecodeError {
    /// Line and column of the offending token, 1-based.
    pub fn position(&self) -> (usize, usize) {
        (self.source.line(), self.source.column())
    }
}

#[derive(Debug, Error)]
#[error("serialize observation: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

pub fn decode(payload: &[u8]) -> Result<Observation, DecodeError> {
    Ok(serde_json::from_slice(payload)?)
}

pub fn encode(observation: &Observation) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(observation)?)
}
