//! TCP server for procctld.
//!
//! The listener:
//! - Binds `host:port` eagerly so callers can read the bound address
//! - Spawns one `ConnectionSession` task per accepted client
//! - Publishes `ServerEvent`s and counts open sessions
//! - Stops accepting when the `CancellationToken` fires
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    Listener     │
//! │  TcpListener    │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ConnectionSession│────▶│ ProcessInspector │
//! │  (per client)   │     │ SignalDispatcher │
//! └───────┬─────────┘     └──────────────────┘
//!         │ publish
//!         ▼
//! ┌─────────────────┐
//! │  ServerEvent    │
//! │  subscribers    │
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`.
//! Accept errors are logged and the loop keeps running; a failing session
//! never takes the listener down.

mod connection;
mod events;

pub use connection::{
    ConnectionError, ConnectionSession, RequestError, SessionConfig, SessionContext, WRITE_TIMEOUT,
};
pub use events::{event_channel, EventSender, ServerEvent, EVENT_BUFFER};

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::dispatcher::SignalDispatcher;
use crate::inspector::ProcessInspector;
use crate::monitor::SessionCounter;
use events::publish;

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bound TCP listener serving procctl clients.
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: SessionContext,
    sessions: SessionCounter,
}

impl Listener {
    /// Binds `config.host:config.port`.
    ///
    /// Port 0 binds a free port; read it back with [`Listener::local_addr`].
    pub async fn bind(
        config: &ServerConfig,
        inspector: ProcessInspector,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| ServerError::Bind {
                addr: config.bind_addr(),
                error: e.to_string(),
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))?;

        Ok(Self {
            listener,
            local_addr,
            ctx: SessionContext {
                inspector,
                dispatcher: SignalDispatcher::new(),
                config: config.session_config(),
                events: event_channel(),
                cancel_token,
            },
            sessions: SessionCounter::default(),
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribes to server events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.ctx.events.subscribe()
    }

    /// Returns the shared open-session counter.
    pub fn active_sessions(&self) -> SessionCounter {
        Arc::clone(&self.sessions)
    }

    /// Accepts connections until the cancellation token fires.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "procctld listening");
        publish(
            &self.ctx.events,
            ServerEvent::Listening {
                addr: self.local_addr,
            },
        );

        let mut connection_counter: u64 = 0;

        loop {
            tokio::select! {
                _ = self.ctx.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            connection_counter = connection_counter.wrapping_add(1);
                            self.handle_connection(stream, peer, connection_counter);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }

        drop(self.listener);
        publish(&self.ctx.events, ServerEvent::Stopped);
        info!(
            open_sessions = self.sessions.load(Ordering::Relaxed),
            "Listener stopped"
        );
        Ok(())
    }

    /// Spawns the session task for a new client.
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr, connection_number: u64) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let guard = SessionGuard::new(Arc::clone(&self.sessions));
        let session = ConnectionSession::new(stream, peer, connection_number, self.ctx.clone());

        tokio::spawn(async move {
            let _guard = guard;
            session.run().await;
        });
    }
}

/// Holds one slot of the open-session count for the life of a session.
struct SessionGuard {
    sessions: SessionCounter,
}

impl SessionGuard {
    fn new(sessions: SessionCounter) -> Self {
        sessions.fetch_add(1, Ordering::Relaxed);
        Self { sessions }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("Failed to read local address: {0}")]
    LocalAddr(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:9000".to_string(),
            error: "address in use".to_string(),
        };
        assert!(err.to_string().contains("0.0.0.0:9000"));
        assert!(err.to_string().contains("address in use"));
    }

    #[test]
    fn test_session_guard_counts() {
        let sessions = SessionCounter::default();
        {
            let _a = SessionGuard::new(Arc::clone(&sessions));
            let _b = SessionGuard::new(Arc::clone(&sessions));
            assert_eq!(sessions.load(Ordering::Relaxed), 2);
        }
        assert_eq!(sessions.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_bind_port_zero() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let listener = Listener::bind(&config, ProcessInspector::system(), CancellationToken::new())
            .await
            .unwrap();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let first = Listener::bind(&config, ProcessInspector::system(), CancellationToken::new())
            .await
            .unwrap();

        let taken = ServerConfig {
            port: first.local_addr().port(),
            ..config
        };
        let err = Listener::bind(&taken, ProcessInspector::system(), CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
