//! AQM coin lifecycle logic.
//!
//! Pure state machines and stores with no I/O of their own. The broker
//! binary wraps [`Broker`] in a QUIC listener; the client wraps [`Inventory`]
//! and [`ContactLedger`] around a network [`BrokerRpc`].
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────── client ────────────────┐
//!            │                                        │
//!  mint ───► │ Inventory (cache + sealed vault)       │
//!            │      ▲                                 │
//!            │      │ store_public_key                │
//!            │ ContactLedger ──fetch──► BrokerRpc ────┼──► Broker
//!            └────────────────────────────────────────┘     (inventories,
//!                                                            mailboxes)
//! ```
//!
//! Randomness and wall-clock time come from an [`Environment`] so tests can
//! drive the clock.

pub mod broker;
pub mod context;
pub mod env;
pub mod inventory;
pub mod ledger;
pub mod policy;
pub mod rpc;

pub use broker::{Broker, BrokerConfig, BrokerError, BrokerStats, DispensePolicy};
pub use context::{ContextOracle, DeviceContext};
pub use env::{Environment, ManualEnv, SystemEnv};
pub use inventory::{CacheOutcome, Inventory, InventoryConfig, InventoryStats};
pub use ledger::{Contact, ContactLedger, GcReport, LedgerError, Replenishment};
pub use policy::{IssuancePolicy, IssueContext, Priority};
pub use rpc::{BrokerRpc, RpcError};
