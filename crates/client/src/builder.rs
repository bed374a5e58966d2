//! Fluent construction of a [`Client`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::auth::is_valid_phone;
use crate::client::{Client, Config, ConnectionState, Inner, SessionState};
use crate::error::{Error, Result};
use crate::pending::PendingTable;
use crate::reconnect::ReconnectBackoff;
use crate::registry::HandlerRegistry;
use crate::session::{DeviceInfo, MemorySessionStore, SessionStore};
use crate::transport::{Endpoint, DEFAULT_ORIGIN};

/// Builds a [`Client`]. Defaults target the production WebSocket endpoint
/// with an in-memory session store.
///
/// # Example
///
/// ```rust,no_run
/// # use std::path::Path;
/// # use std::sync::Arc;
/// # use oneme_client::{Client, FileSessionStore};
/// let store = Arc::new(FileSessionStore::new(Path::new("/tmp/oneme")).unwrap());
/// let client = Client::builder()
///     .phone("+79991234567")
///     .session_store(store)
///     .request_timeout(std::time::Duration::from_secs(10))
///     .build()
///     .unwrap();
/// ```
pub struct ClientBuilder {
    endpoint: Endpoint,
    origin: String,
    phone: Option<String>,
    token: Option<String>,
    store: Option<Arc<dyn SessionStore>>,
    device: DeviceInfo,
    request_timeout: Duration,
    ping_interval: Duration,
    auto_reconnect: bool,
    backoff: ReconnectBackoff,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            endpoint: Endpoint::official_ws(),
            origin: DEFAULT_ORIGIN.to_string(),
            phone: None,
            token: None,
            store: None,
            device: DeviceInfo::default(),
            request_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            auto_reconnect: true,
            backoff: ReconnectBackoff::default(),
        }
    }

    /// Connect to an arbitrary endpoint.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Connect over WebSocket to `url`.
    pub fn websocket_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Endpoint::Ws(url.into());
        self
    }

    /// Connect over plaintext TCP to `addr` (`host:port`). The production
    /// packet endpoint needs TLS; use [`Endpoint::official_tcp`] for that.
    pub fn tcp_addr(mut self, addr: impl Into<String>) -> Self {
        self.endpoint = Endpoint::tcp(addr);
        self
    }

    /// Origin header presented on WebSocket connects.
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Phone number for the interactive auth flow.
    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Session token, skipping the interactive flow. Takes precedence over
    /// a token loaded from the session store.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Where session state persists between runs.
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Device identity presented in the handshake.
    pub fn device(mut self, device: DeviceInfo) -> Self {
        self.device = device;
        self
    }

    /// Per-request response deadline.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Keep-alive ping interval.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Whether a dropped connection is redialed automatically.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Backoff schedule for reconnect attempts.
    pub fn reconnect_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Validate the configuration and assemble the client. Nothing
    /// connects until [`Client::connect`] runs.
    pub fn build(self) -> Result<Client> {
        if let Some(phone) = &self.phone {
            if !is_valid_phone(phone) {
                return Err(Error::Auth(format!("invalid phone number {phone:?}")));
            }
        }
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new()));
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);

        let inner = Inner {
            cfg: Config {
                endpoint: self.endpoint,
                origin: self.origin,
                device: self.device,
                request_timeout: self.request_timeout,
                ping_interval: self.ping_interval,
                auto_reconnect: self.auto_reconnect,
                backoff: self.backoff,
            },
            store,
            session: Mutex::new(SessionState {
                phone: self.phone,
                token: self.token,
                ..SessionState::default()
            }),
            pending: PendingTable::new(),
            registry: HandlerRegistry::new(),
            state_tx,
            conn: RwLock::new(None),
            shutdown: CancellationToken::new(),
            runner: Mutex::new(None),
        };
        Ok(Client {
            inner: Arc::new(inner),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
