//! Broker request/response seam.
//!
//! The ledger and client speak to the broker only through [`BrokerRpc`]. The
//! QUIC client implements it over the network; [`crate::Broker`] implements it
//! in-process.

use aqm_proto::{Coin, Packet, PublishAck, Tier, TierCounts};
use async_trait::async_trait;
use thiserror::Error;

/// Failure of one broker call.
///
/// "Nothing found" is never an error: `fetch` returns `Ok(None)` and `drain`
/// an empty vector.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Connection refused, reset or timed out.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The broker rejected the request.
    #[error("broker rejected request ({code}): {message}")]
    Rejected {
        /// Error code from the broker
        code: u16,
        /// Broker's message
        message: String,
    },

    /// The broker answered with something that is not a valid response.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// The five broker operations.
#[async_trait]
pub trait BrokerRpc: Send + Sync {
    /// Publish a batch of coins. All or nothing.
    async fn publish(&self, coins: Vec<Coin>) -> Result<PublishAck, RpcError>;

    /// Fetch one coin of `tier` minted by `user`.
    async fn fetch(&self, user: &str, tier: Tier) -> Result<Option<Coin>, RpcError>;

    /// Route a packet to its recipient's mailbox.
    async fn send(&self, packet: Packet) -> Result<(), RpcError>;

    /// Take every pending packet for `user`.
    async fn drain(&self, user: &str) -> Result<Vec<Packet>, RpcError>;

    /// Count `user`'s published coins per tier.
    async fn count(&self, user: &str) -> Result<TierCounts, RpcError>;
}
