//! wsbridge core library — mapping store, media classification, relay
//! pipeline, channel provisioning, and the operator command surface used by
//! the CLI.

pub mod bridge;
pub mod channels;
pub mod commands;
pub mod config;
pub mod dedup;
pub mod media;
pub mod provision;
pub mod relay;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
