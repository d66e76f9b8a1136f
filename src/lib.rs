//! Async client engine for SPEC/certif style instrument-control servers.
//!
//! One TCP connection carries three traffic shapes at once: numbered
//! requests with replies, server pushes for subscribed properties, and
//! console output. This crate demultiplexes them:
//!
//! - a request correlator that pairs replies with requests by sequence number
//! - a single receive loop that routes every inbound frame
//! - a subscription registry with an explicit per-property state machine
//! - a watch cache that answers reads locally
//! - console command execution with output capture
//! - timed counting across all scaler channels
//!
//! See [`Client`] for the operation surface.

mod client;
mod config;
mod errors;
mod network;
mod proto;

pub mod constants;

pub use client::*;
pub use config::*;
pub use errors::*;
pub use network::*;
pub use proto::*;

//-----------------------------------------------------------
// Test utils
