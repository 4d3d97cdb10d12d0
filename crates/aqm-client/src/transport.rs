//! QUIC transport for the client.
//!
//! [`QuicBroker`] implements [`BrokerRpc`] over one QUIC connection. Each call
//! opens a fresh bidirectional stream, writes one request frame, finishes,
//! and reads one response frame. The whole round trip is bounded by the
//! request timeout. A closed connection is re-established on the next call.

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};

use aqm_core::{BrokerRpc, RpcError};
use aqm_proto::{
    ALPN_PROTOCOL, Coin, CountRequest, DrainRequest, FetchRequest, Frame, FrameHeader, Packet,
    Payload, PublishAck, Tier, TierCounts,
};
use async_trait::async_trait;
use quinn::{ClientConfig, Endpoint};
use thiserror::Error;

/// Largest response the client reads from one stream.
const MAX_RESPONSE_BYTES: usize = FrameHeader::SIZE + FrameHeader::MAX_PAYLOAD_SIZE as usize;

/// Server name presented during the TLS handshake.
const SERVER_NAME: &str = "localhost";

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Bad address or endpoint setup failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Broker reached over QUIC.
pub struct QuicBroker {
    endpoint: Endpoint,
    server_addr: SocketAddr,
    connection: Mutex<quinn::Connection>,
    request_timeout: Duration,
}

impl QuicBroker {
    /// Connect to a broker at `server_addr`.
    pub async fn connect(
        server_addr: &str,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let addr: SocketAddr = server_addr
            .parse()
            .map_err(|e| TransportError::Config(format!("invalid address: {e}")))?;

        let bind: SocketAddr = if addr.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let mut endpoint = Endpoint::client(bind)
            .map_err(|e| TransportError::Config(format!("endpoint creation failed: {e}")))?;
        endpoint.set_default_client_config(insecure_client_config()?);

        let connection = dial(&endpoint, addr).await?;
        tracing::info!(%addr, "connected to broker");

        Ok(Self { endpoint, server_addr: addr, connection: Mutex::new(connection), request_timeout })
    }

    /// One request/response round trip, bounded by the request timeout.
    async fn call(&self, request: Payload) -> Result<Payload, RpcError> {
        let opcode = request.opcode();
        match tokio::time::timeout(self.request_timeout, self.round_trip(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(?opcode, timeout = ?self.request_timeout, "request timed out");
                Err(RpcError::Transport(format!(
                    "request timed out after {:?}",
                    self.request_timeout
                )))
            },
        }
    }

    async fn round_trip(&self, request: Payload) -> Result<Payload, RpcError> {
        let frame = request.into_frame().map_err(|e| RpcError::Protocol(e.to_string()))?;
        let mut buf = Vec::with_capacity(frame.encoded_len());
        frame.encode(&mut buf).map_err(|e| RpcError::Protocol(e.to_string()))?;

        let connection = self.live_connection().await?;
        let (mut send, mut recv) = connection
            .open_bi()
            .await
            .map_err(|e| RpcError::Transport(format!("open stream failed: {e}")))?;

        send.write_all(&buf)
            .await
            .map_err(|e| RpcError::Transport(format!("write failed: {e}")))?;
        send.finish().map_err(|e| RpcError::Transport(format!("finish failed: {e}")))?;

        let bytes = recv
            .read_to_end(MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| RpcError::Transport(format!("read failed: {e}")))?;

        let frame = Frame::decode(&bytes).map_err(|e| RpcError::Protocol(e.to_string()))?;
        match Payload::from_frame(&frame).map_err(|e| RpcError::Protocol(e.to_string()))? {
            Payload::Error(err) => Err(RpcError::Rejected { code: err.code, message: err.message }),
            response => Ok(response),
        }
    }

    /// Current connection, redialing if the previous one closed.
    async fn live_connection(&self) -> Result<quinn::Connection, RpcError> {
        let current = self.lock_connection().clone();
        if current.close_reason().is_none() {
            return Ok(current);
        }

        tracing::info!(addr = %self.server_addr, "broker connection closed; redialing");
        let fresh = dial(&self.endpoint, self.server_addr)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        *self.lock_connection() = fresh.clone();
        Ok(fresh)
    }

    #[allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]
    fn lock_connection(&self) -> std::sync::MutexGuard<'_, quinn::Connection> {
        self.connection.lock().expect("QuicBroker mutex poisoned")
    }
}

impl std::fmt::Debug for QuicBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuicBroker")
            .field("server_addr", &self.server_addr)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

fn unexpected(response: &Payload) -> RpcError {
    RpcError::Protocol(format!("unexpected response {:?}", response.opcode()))
}

#[async_trait]
impl BrokerRpc for QuicBroker {
    async fn publish(&self, coins: Vec<Coin>) -> Result<PublishAck, RpcError> {
        match self.call(Payload::Publish(coins)).await? {
            Payload::PublishAck(ack) => Ok(ack),
            other => Err(unexpected(&other)),
        }
    }

    async fn fetch(&self, user: &str, tier: Tier) -> Result<Option<Coin>, RpcError> {
        match self.call(Payload::Fetch(FetchRequest { user: user.to_string(), tier })).await? {
            Payload::CoinGranted(coin) => Ok(Some(coin)),
            Payload::NotFound => Ok(None),
            other => Err(unexpected(&other)),
        }
    }

    async fn send(&self, packet: Packet) -> Result<(), RpcError> {
        match self.call(Payload::Send(packet)).await? {
            Payload::SendAck => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn drain(&self, user: &str) -> Result<Vec<Packet>, RpcError> {
        match self.call(Payload::Drain(DrainRequest { user: user.to_string() })).await? {
            Payload::Mailbox(packets) => Ok(packets),
            other => Err(unexpected(&other)),
        }
    }

    async fn count(&self, user: &str) -> Result<TierCounts, RpcError> {
        match self.call(Payload::Count(CountRequest { user: user.to_string() })).await? {
            Payload::Counts(counts) => Ok(counts),
            other => Err(unexpected(&other)),
        }
    }
}

async fn dial(endpoint: &Endpoint, addr: SocketAddr) -> Result<quinn::Connection, TransportError> {
    endpoint
        .connect(addr, SERVER_NAME)
        .map_err(|e| TransportError::Connection(format!("connect failed: {e}")))?
        .await
        .map_err(|e| TransportError::Connection(format!("handshake failed: {e}")))
}

/// Client config that accepts any server certificate.
///
/// WARNING: Development only. Matches the broker's self-signed certificate.
fn insecure_client_config() -> Result<ClientConfig, TransportError> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
        .with_no_client_auth();

    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let mut config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| TransportError::Config(format!("QUIC config error: {e}")))?,
    ));

    let mut transport = quinn::TransportConfig::default();
    let idle = Duration::from_secs(30)
        .try_into()
        .map_err(|e| TransportError::Config(format!("idle timeout: {e}")))?;
    transport.max_idle_timeout(Some(idle));
    transport.keep_alive_interval(Some(Duration::from_secs(10)));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate (insecure, for
/// development).
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
