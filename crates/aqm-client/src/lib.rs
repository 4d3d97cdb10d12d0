//! AQM client.
//!
//! Mints one-time coins for the local user, keeps contacts' coins stocked
//! according to how often we talk to them, sends messages addressed to a
//! single coin and drains the mailbox, burning each coin's secret on receipt.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Runtime: maintenance / listener / console     │
//! └───────────────┬──────────────────────────────┘
//!                 │
//! ┌───────────────▼──────────┐   ┌───────────────┐
//! │ Client + ContactLedger   │──►│ Inventory     │
//! └───────────────┬──────────┘   └───────────────┘
//!                 │ BrokerRpc
//! ┌───────────────▼──────────┐
//! │ QuicBroker (quinn)       │
//! └──────────────────────────┘
//! ```
//!
//! [`Client`] and [`Runtime`] are generic over [`aqm_core::BrokerRpc`] and
//! [`aqm_core::Environment`], so tests run them against an in-process
//! [`aqm_core::Broker`] with a manual clock.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
pub mod command;
pub mod runtime;
mod tracker;
pub mod transport;

pub use client::{Client, ClientError, MailReport, MintReport, NONCE_BYTES};
pub use command::{Command, parse_command};
pub use runtime::{ClientConfig, Runtime, RuntimeError, Timing, run};
pub use tracker::InteractionTracker;
pub use transport::{QuicBroker, TransportError};
