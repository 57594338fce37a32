pub mod config;
pub mod consumer;
pub mod delivery;
pub mod error;
pub mod forwarder;
pub mod pipeline;

#[cfg(test)]
mod test_support;
