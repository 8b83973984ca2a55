//! State synchronization engine for an MQTT-connected plant monitor.
//!
//! The [`engine::Engine`] owns the connection lifecycle, turns inbound
//! topic/payload pairs into an immutable [`state::DeviceState`] snapshot,
//! and publishes user intents as single-letter commands on the device's
//! request topic.

pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod router;
pub mod state;
pub mod supervisor;
pub mod topics;
pub mod transport;
pub mod web;

#[cfg(test)]
mod testing;
