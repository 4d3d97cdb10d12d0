//! AQM coin broker server.
//!
//! Wraps the [`aqm_core::Broker`] store with Quinn QUIC transport and the
//! Tokio runtime.
//!
//! # Request flow
//!
//! Every RPC is one bidirectional stream. The client writes a single request
//! frame and finishes its side; the server reads to end, answers with a
//! single response frame and finishes. Malformed requests get an `Error`
//! response and change no state.
//!
//! A background task purges coins that were never dispensed once they pass
//! the configured age.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod transport;

use std::time::Duration;

use aqm_core::{Broker, BrokerConfig, Environment, SystemEnv};
use aqm_proto::{ErrorPayload, Frame, FrameHeader, Payload};
pub use error::ServerError;
pub use transport::{QuinnConnection, QuinnTransport};

/// Largest request the server reads from one stream.
const MAX_REQUEST_BYTES: usize = FrameHeader::SIZE + FrameHeader::MAX_PAYLOAD_SIZE as usize;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// Broker store configuration
    pub broker: BrokerConfig,
    /// How often the stale coin purge runs
    pub purge_interval: Duration,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            broker: BrokerConfig::default(),
            purge_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Production AQM broker server.
pub struct Server {
    broker: Broker<SystemEnv>,
    transport: QuinnTransport,
    env: SystemEnv,
    purge_interval: Duration,
}

impl Server {
    /// Create and bind a new server with an empty store.
    pub fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let broker = Broker::new(config.broker, env);

        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        Ok(Self { broker, transport, env, purge_interval: config.purge_interval })
    }

    /// Handle to the broker store. Clones share state with the server.
    pub fn broker(&self) -> Broker<SystemEnv> {
        self.broker.clone()
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Run the server, accepting connections until the endpoint closes.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.transport.local_addr()?, "broker serving");

        let purge = tokio::spawn(purge_loop(self.broker.clone(), self.env, self.purge_interval));

        loop {
            match self.transport.accept().await {
                Ok(Some(conn)) => {
                    let broker = self.broker.clone();
                    tokio::spawn(async move {
                        handle_connection(conn, broker).await;
                    });
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                },
            }
        }

        purge.abort();
        Ok(())
    }
}

async fn purge_loop(broker: Broker<SystemEnv>, env: SystemEnv, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        broker.purge_stale(env.wall_clock_secs());
    }
}

/// Serve request streams on one connection until it closes.
async fn handle_connection(conn: QuinnConnection, broker: Broker<SystemEnv>) {
    let peer = conn.remote_addr();
    tracing::debug!(%peer, "connection accepted");

    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let broker = broker.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_stream(send, recv, &broker).await {
                        tracing::debug!(%peer, error = %e, "stream failed");
                    }
                });
            },
            Err(e) => {
                tracing::debug!(%peer, reason = %e, "connection closed");
                break;
            },
        }
    }
}

/// Read one request frame, answer it, finish the stream.
async fn handle_stream(
    mut send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    broker: &Broker<SystemEnv>,
) -> Result<(), ServerError> {
    let request = recv
        .read_to_end(MAX_REQUEST_BYTES)
        .await
        .map_err(|e| ServerError::Transport(format!("read failed: {e}")))?;

    let response = respond(broker, &request)?;

    send.write_all(&response)
        .await
        .map_err(|e| ServerError::Transport(format!("write failed: {e}")))?;
    send.finish().map_err(|e| ServerError::Transport(format!("finish failed: {e}")))?;

    Ok(())
}

/// Answer one encoded request with one encoded response.
///
/// Undecodable frames become `INVALID_PAYLOAD` error responses.
pub fn respond<E: Environment>(broker: &Broker<E>, request: &[u8]) -> Result<Vec<u8>, ServerError> {
    let reply = match Frame::decode(request) {
        Ok(frame) => broker.handle_frame(&frame),
        Err(e) => {
            tracing::debug!(error = %e, len = request.len(), "undecodable request frame");
            Payload::Error(ErrorPayload::invalid_payload(e.to_string()))
        },
    };

    let frame = reply.into_frame()?;
    let mut out = Vec::with_capacity(frame.encoded_len());
    frame.encode(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use aqm_core::ManualEnv;
    use aqm_proto::{Coin, DrainRequest, KeyId, Opcode, Tier};

    use super::*;

    fn broker() -> Broker<ManualEnv> {
        Broker::new(BrokerConfig::default(), ManualEnv::starting_at(1_700_000_000))
    }

    fn encode(payload: Payload) -> Vec<u8> {
        let frame = payload.into_frame().unwrap();
        let mut out = Vec::new();
        frame.encode(&mut out).unwrap();
        out
    }

    fn decode(bytes: &[u8]) -> Payload {
        Payload::from_frame(&Frame::decode(bytes).unwrap()).unwrap()
    }

    #[test]
    fn respond_publish_then_count() {
        let broker = broker();
        let coin = Coin {
            owner: "alice".to_string(),
            key_id: KeyId(1),
            tier: Tier::Bronze,
            public_key_hex: "aa".to_string(),
            signature_hex: "bb".to_string(),
        };

        let reply = decode(&respond(&broker, &encode(Payload::Publish(vec![coin]))).unwrap());
        assert_eq!(reply.opcode(), Opcode::PublishAck);
        assert_eq!(broker.inventory_count("alice").bronze, 1);
    }

    #[test]
    fn respond_to_garbage_with_error() {
        let broker = broker();

        let reply = decode(&respond(&broker, b"definitely not a frame").unwrap());
        assert!(matches!(
            reply,
            Payload::Error(ErrorPayload { code: ErrorPayload::INVALID_PAYLOAD, .. })
        ));
    }

    #[test]
    fn respond_to_empty_drain() {
        let broker = broker();
        let request = encode(Payload::Drain(DrainRequest { user: "bob".to_string() }));

        assert_eq!(decode(&respond(&broker, &request).unwrap()), Payload::Mailbox(Vec::new()));
    }
}
