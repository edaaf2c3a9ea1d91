//! Streaming trading-session simulator: an L2 snapshot feed drives a shared
//! order book, a matching engine turns strategy intents into simulated
//! fills, and a coordinator fans independent sessions out and back in.

pub mod book;
pub mod broker;
pub mod error;
pub mod feed;
pub mod session;
pub mod strategy;
pub mod telemetry;
pub mod types;
pub mod updater;
