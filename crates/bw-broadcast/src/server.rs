use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::BroadcastError;
use crate::registry::SubscriberRegistry;
use crate::subscriber::WsSubscriber;

/// Delay between two polls of the non-blocking listener.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Accepts WebSocket subscribers and registers them.
///
/// The listener is non-blocking and polled from a named thread so that
/// `shutdown` can stop it promptly. Each upgrade handshake runs on its own
/// short-lived thread so a stalled peer never delays the others.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use bw_broadcast::{BroadcastServer, SubscriberRegistry};
///
/// let registry = Arc::new(SubscriberRegistry::new());
/// let server = BroadcastServer::bind("127.0.0.1:5343", Arc::clone(&registry), Duration::from_millis(250)).unwrap();
/// println!("listening on {}", server.local_addr());
/// ```
pub struct BroadcastServer {
    local_addr: SocketAddr,
    registry: Arc<SubscriberRegistry>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BroadcastServer {
    /// Bind `addr` and start accepting.
    ///
    /// # Errors
    /// Returns [`BroadcastError::Bind`] if the address cannot be bound, or
    /// [`BroadcastError::Thread`] if the accept thread cannot be spawned.
    pub fn bind(
        addr: &str,
        registry: Arc<SubscriberRegistry>,
        write_timeout: Duration,
    ) -> Result<Self, BroadcastError> {
        let bind_err = |source| BroadcastError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let running = Arc::clone(&running);
            let registry = Arc::clone(&registry);
            thread::Builder::new()
                .name("bw-accept".to_string())
                .spawn(move || accept_loop(&listener, &registry, &running, write_timeout))
                .map_err(|e| BroadcastError::Thread(e.to_string()))?
        };

        log::info!("WebSocket démarré @ ws://{local_addr}/");
        Ok(Self {
            local_addr,
            registry,
            running,
            thread: Some(thread),
        })
    }

    /// Address actually bound (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registry the server feeds.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Stop accepting, join the accept thread and disconnect every subscriber.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::warn!("Accept thread panicked");
            }
            self.registry.clear();
            log::info!("Broadcast arrêté");
        }
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    listener: &TcpListener,
    registry: &Arc<SubscriberRegistry>,
    running: &AtomicBool,
    write_timeout: Duration,
) {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let registry = Arc::clone(registry);
                let spawned = thread::Builder::new()
                    .name("bw-handshake".to_string())
                    .spawn(move || match WsSubscriber::accept(stream, write_timeout) {
                        Ok(sub) => {
                            registry.add(Arc::new(sub));
                        }
                        Err(e) => log::warn!("Connexion refusée depuis {addr} : {e}"),
                    });
                if let Err(e) = spawned {
                    log::warn!("Handshake impossible pour {addr} : {e}");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                log::warn!("Accept error: {e}");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}
