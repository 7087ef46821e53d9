//! `EphemeraServer` builder and server loop.
//!
//! This is the entry point for running an Ephemera chat server. It ties
//! together all the layers: transport → protocol → session → room.

use std::sync::Arc;
use std::time::Duration;

use ephemera_protocol::{Codec, JsonCodec};
use ephemera_room::{
    HubConfig, LedgerConfig, MessageLedger, PresenceConfig, PresenceTracker, RoomHub,
    Sweeper,
};
use ephemera_session::{
    AlphanumericPolicy, CredentialPolicy, SharedClock, SystemClock, TokenStore,
};
use ephemera_transport::{Transport, WebSocketTransport};

use crate::EphemeraError;
use crate::handler::handle_connection;

/// Default interval of the background sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Default time a connection may stay silent before it is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. The
/// services synchronize internally, so no lock lives here.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) tokens: Arc<TokenStore>,
    pub(crate) ledger: Arc<MessageLedger>,
    pub(crate) presence: Arc<PresenceTracker>,
    pub(crate) hub: Arc<RoomHub>,
    pub(crate) clock: SharedClock,
    pub(crate) codec: C,
    pub(crate) idle_timeout: Duration,
}

/// Builder for configuring and starting an Ephemera server.
///
/// # Example
///
/// ```rust,no_run
/// use ephemera::prelude::*;
///
/// # async fn start() -> Result<(), EphemeraError> {
/// let server = EphemeraServer::builder()
///     .bind("0.0.0.0:8080")
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct EphemeraServerBuilder {
    bind_addr: String,
    ledger_config: LedgerConfig,
    presence_config: PresenceConfig,
    hub_config: HubConfig,
    policy: Box<dyn CredentialPolicy>,
    clock: SharedClock,
    sweep_interval: Option<Duration>,
    idle_timeout: Duration,
}

impl EphemeraServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            ledger_config: LedgerConfig::default(),
            presence_config: PresenceConfig::default(),
            hub_config: HubConfig::default(),
            policy: Box::new(AlphanumericPolicy::default()),
            clock: Arc::new(SystemClock),
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    pub fn ledger_config(mut self, config: LedgerConfig) -> Self {
        self.ledger_config = config;
        self
    }

    pub fn presence_config(mut self, config: PresenceConfig) -> Self {
        self.presence_config = config;
        self
    }

    pub fn hub_config(mut self, config: HubConfig) -> Self {
        self.hub_config = config;
        self
    }

    /// Replaces the default alphanumeric credential check.
    pub fn credential_policy(mut self, policy: impl CredentialPolicy) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Sets the clock every timestamp comes from. Tests pass a
    /// `ManualClock` here.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// How often the background sweeper runs. `None` disables it, leaving
    /// only the sweeps that run inline before reads.
    pub fn sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// How long a connection may go without sending a frame.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Binds the listener and wires the services together.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build(self) -> Result<EphemeraServer<JsonCodec>, EphemeraError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;

        let clock = self.clock;
        let tokens = Arc::new(TokenStore::with_policy(clock.clone(), self.policy));
        let hub = Arc::new(RoomHub::new(self.hub_config));
        let ledger = Arc::new(MessageLedger::new(
            tokens.clone(),
            hub.clone(),
            clock.clone(),
            self.ledger_config,
        ));
        let presence = Arc::new(PresenceTracker::new(
            tokens.clone(),
            hub.clone(),
            clock.clone(),
            self.presence_config,
        ));

        let state = Arc::new(ServerState {
            tokens,
            ledger,
            presence,
            hub,
            clock,
            codec: JsonCodec,
            idle_timeout: self.idle_timeout,
        });

        Ok(EphemeraServer {
            transport,
            state,
            sweep_interval: self.sweep_interval,
        })
    }
}

impl Default for EphemeraServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Ephemera chat server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct EphemeraServer<C: Codec = JsonCodec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<C>>,
    sweep_interval: Option<Duration>,
}

impl EphemeraServer<JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> EphemeraServerBuilder {
        EphemeraServerBuilder::new()
    }
}

impl<C: Codec> EphemeraServer<C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, EphemeraError> {
        Ok(self.transport.local_addr()?)
    }

    /// Runs the server accept loop.
    ///
    /// Starts the background sweeper (if enabled), then spawns a handler
    /// task for each accepted connection. Runs until the process is
    /// terminated.
    pub async fn run(mut self) -> Result<(), EphemeraError> {
        let _sweeper = self.sweep_interval.map(|period| {
            let sweeper = Sweeper::new(
                self.state.ledger.clone(),
                self.state.presence.clone(),
                self.state.hub.clone(),
            );
            AbortOnDrop(sweeper.spawn(period))
        });

        tracing::info!(addr = ?self.transport.local_addr().ok(), "Ephemera server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

/// Stops the background sweeper when the accept loop's future is dropped.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
