//! Async runtime
//!
//! Drives three concurrent activities against one [`Client`]:
//!
//! - Maintenance: when the device oracle reports an ideal state, mint a
//!   batch and replenish every tracked contact. Idle contacts are collected
//!   every cycle.
//! - Listener: drain the mailbox and burn secrets for arrived packets.
//! - Console: read `recipient: text` lines and send them; `exit` stops.
//!
//! A `watch` stop signal is checked at the top of every iteration. Calls
//! already in flight finish before the activity exits. A failure in one
//! iteration is logged and does not affect the other activities.

use std::{sync::Arc, time::Duration};

use aqm_core::{
    BrokerRpc, ContactLedger, ContextOracle, DeviceContext, Environment, Inventory,
    InventoryConfig, SystemEnv, inventory::DEFAULT_CACHE_CEILING,
};
use aqm_crypto::{CryptoError, KeyMintEngine};
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::watch,
};

use crate::{
    Client, ClientError, InteractionTracker,
    command::{Command, parse_command},
    transport::{QuicBroker, TransportError},
};

/// Runtime errors. All are fatal at startup.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Crypto engine or vault failed to initialize.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Could not reach the broker.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Client runtime configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker address (e.g., "127.0.0.1:4433")
    pub server_addr: String,
    /// Our identity
    pub user: String,
    /// Assumed per-cycle interaction rates
    pub baseline: Vec<(String, u32)>,
    /// Device conditions fed to the oracle
    pub device: DeviceContext,
    /// Cycle timing
    pub timing: Timing,
    /// Deadline for one broker call
    pub request_timeout: Duration,
    /// Public key cache ceiling in bytes
    pub cache_ceiling: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4433".to_string(),
            user: String::new(),
            baseline: Vec::new(),
            device: DeviceContext::default(),
            timing: Timing::default(),
            request_timeout: Duration::from_secs(2),
            cache_ceiling: DEFAULT_CACHE_CEILING,
        }
    }
}

/// How often each activity runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Pause between maintenance cycles
    pub maintenance_interval: Duration,
    /// Pause between mailbox drains
    pub listener_interval: Duration,
    /// Contacts idle longer than this are demoted and their coins dropped
    pub contact_max_idle: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            maintenance_interval: Duration::from_secs(30),
            listener_interval: Duration::from_secs(2),
            contact_max_idle: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Connect to the broker and run until `exit`, end of input or `stop`.
pub async fn run(config: ClientConfig) -> Result<(), RuntimeError> {
    if config.user.is_empty() {
        return Err(RuntimeError::Config("user must not be empty".to_string()));
    }

    let engine = Arc::new(KeyMintEngine::new()?);
    let inventory = Inventory::new(InventoryConfig { cache_ceiling: config.cache_ceiling })?;
    let rpc = Arc::new(QuicBroker::connect(&config.server_addr, config.request_timeout).await?);
    let env = SystemEnv::new();

    let client = Client::new(config.user.clone(), engine, inventory, rpc, env);
    let runtime = Runtime::new(client, Arc::new(config.device), config.timing)
        .with_baseline(config.baseline);

    let stop = runtime.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping");
            stop.send_replace(true);
        }
    });

    tracing::info!(user = %config.user, server = %config.server_addr, "client running");
    runtime.run(BufReader::new(tokio::io::stdin())).await;
    Ok(())
}

/// The three activities around one client.
pub struct Runtime<R, E> {
    client: Arc<Client<R, E>>,
    ledger: ContactLedger<R, E>,
    tracker: Arc<InteractionTracker>,
    oracle: Arc<dyn ContextOracle>,
    timing: Timing,
    env: E,
    stop: Arc<watch::Sender<bool>>,
}

impl<R, E> Runtime<R, E>
where
    R: BrokerRpc + 'static,
    E: Environment,
{
    /// Wrap `client`. The ledger shares the client's inventory and broker.
    pub fn new(client: Client<R, E>, oracle: Arc<dyn ContextOracle>, timing: Timing) -> Self {
        let ledger = ContactLedger::new(
            client.inventory().clone(),
            client.rpc().clone(),
            client.env().clone(),
        );
        let env = client.env().clone();
        let (stop, _) = watch::channel(false);

        Self {
            client: Arc::new(client),
            ledger,
            tracker: Arc::new(InteractionTracker::new()),
            oracle,
            timing,
            env,
            stop: Arc::new(stop),
        }
    }

    /// Seed the tracker with assumed rates.
    #[must_use]
    pub fn with_baseline(self, baseline: Vec<(String, u32)>) -> Self {
        for (user, rate) in baseline {
            self.tracker.set_baseline(&user, rate);
        }
        self
    }

    /// Setting this to `true` stops every activity at its next iteration.
    pub fn stop_handle(&self) -> Arc<watch::Sender<bool>> {
        Arc::clone(&self.stop)
    }

    /// Shared client handle.
    pub fn client(&self) -> Arc<Client<R, E>> {
        Arc::clone(&self.client)
    }

    /// Run all activities with console lines read from `input`.
    ///
    /// Returns once all three have stopped. End of input counts as `exit`.
    pub async fn run<I>(self, input: I)
    where
        I: AsyncBufRead + Unpin + Send + 'static,
    {
        let maintenance = tokio::spawn(maintenance_loop(
            Arc::clone(&self.client),
            self.ledger,
            Arc::clone(&self.tracker),
            Arc::clone(&self.oracle),
            self.env.clone(),
            self.timing,
            self.stop.subscribe(),
        ));
        let listener = tokio::spawn(listener_loop(
            Arc::clone(&self.client),
            self.env.clone(),
            self.timing.listener_interval,
            self.stop.subscribe(),
        ));
        let console = tokio::spawn(console_loop(
            Arc::clone(&self.client),
            Arc::clone(&self.tracker),
            Arc::clone(&self.oracle),
            input,
            Arc::clone(&self.stop),
        ));

        if let Err(e) = console.await {
            tracing::error!(error = %e, "console task failed");
        }
        self.stop.send_replace(true);

        for (name, handle) in [("maintenance", maintenance), ("listener", listener)] {
            if let Err(e) = handle.await {
                tracing::error!(task = name, error = %e, "task failed");
            }
        }
        tracing::info!("runtime stopped");
    }
}

async fn maintenance_loop<R, E>(
    client: Arc<Client<R, E>>,
    mut ledger: ContactLedger<R, E>,
    tracker: Arc<InteractionTracker>,
    oracle: Arc<dyn ContextOracle>,
    env: E,
    timing: Timing,
    mut stop: watch::Receiver<bool>,
) where
    R: BrokerRpc + 'static,
    E: Environment,
{
    loop {
        if *stop.borrow() {
            break;
        }

        if oracle.is_ideal_state() {
            match client.mint_batch().await {
                Ok(report) => tracing::debug!(
                    seed = report.seed,
                    minted = report.minted.total(),
                    skipped = report.skipped,
                    "mint cycle done"
                ),
                Err(e) => tracing::warn!(error = %e, "mint cycle failed"),
            }

            for (user, rate) in tracker.snapshot_and_reset() {
                if user == client.user() {
                    continue;
                }
                ledger.update_interaction(&user, rate).await;
            }
        } else {
            tracing::debug!("device not in ideal state; skipping mint and replenishment");
        }

        let gc = ledger.collect_inactive(timing.contact_max_idle);
        if gc.contacts_demoted > 0 {
            tracing::info!(
                demoted = gc.contacts_demoted,
                purged = gc.coins_purged,
                "collected idle contacts"
            );
        }

        if pause(&env, &mut stop, timing.maintenance_interval).await {
            break;
        }
    }
    tracing::debug!("maintenance stopped");
}

async fn listener_loop<R, E>(
    client: Arc<Client<R, E>>,
    env: E,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) where
    R: BrokerRpc + 'static,
    E: Environment,
{
    loop {
        if *stop.borrow() {
            break;
        }

        match client.check_mail().await {
            Ok(report) => {
                for packet in &report.delivered {
                    tracing::info!(
                        key_id = %packet.key_id,
                        tier = %packet.tier,
                        message = %packet.payload,
                        "incoming message"
                    );
                }
            },
            Err(e) => tracing::warn!(error = %e, "mailbox check failed"),
        }

        if pause(&env, &mut stop, interval).await {
            break;
        }
    }
    tracing::debug!("listener stopped");
}

async fn console_loop<R, E, I>(
    client: Arc<Client<R, E>>,
    tracker: Arc<InteractionTracker>,
    oracle: Arc<dyn ContextOracle>,
    input: I,
    stop: Arc<watch::Sender<bool>>,
) where
    R: BrokerRpc + 'static,
    E: Environment,
    I: AsyncBufRead + Unpin + Send,
{
    let mut lines = input.lines();
    let mut stopped = stop.subscribe();

    loop {
        if *stopped.borrow() {
            break;
        }

        let line = tokio::select! {
            changed = stopped.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            },
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("console input closed");
                break;
            },
            Err(e) => {
                tracing::warn!(error = %e, "console read failed");
                break;
            },
        };

        match parse_command(&line) {
            Command::Send { recipient, text } => {
                let tier = oracle.select_tier();
                match client.send_message(&recipient, &text, tier).await {
                    Ok(_) => tracker.record_send(&recipient),
                    Err(ClientError::KeyExhausted { .. }) => {
                        tracing::error!(%recipient, %tier, "no coin available for recipient");
                    },
                    Err(e) => tracing::warn!(%recipient, error = %e, "send failed"),
                }
            },
            Command::Exit => break,
            Command::Ignored => {},
        }
    }

    stop.send_replace(true);
    tracing::debug!("console stopped");
}

/// Sleep for `duration` or until stop is signalled. True if stopping.
async fn pause<E: Environment>(
    env: &E,
    stop: &mut watch::Receiver<bool>,
    duration: Duration,
) -> bool {
    let closed = tokio::select! {
        changed = stop.changed() => changed.is_err(),
        () = env.sleep(duration) => false,
    };
    closed || *stop.borrow()
}
