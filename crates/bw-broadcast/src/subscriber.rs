use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tungstenite::{Message, WebSocket};

use crate::error::BroadcastError;

/// Upper bound on the HTTP upgrade exchange of a new peer.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// A connected consumer of serialized results.
///
/// Implementations are shared between the listener and the publisher, so
/// all methods take `&self`.
pub trait Subscriber: Send + Sync {
    /// `false` once the peer is gone; closed subscribers get pruned.
    fn is_open(&self) -> bool;

    /// Deliver one message.
    ///
    /// # Errors
    /// Returns the transport error; the caller prunes the subscriber.
    fn send(&self, message: &str) -> io::Result<()>;

    /// Close the connection. Idempotent.
    fn close(&self);

    /// Peer description for logs.
    fn peer(&self) -> String;
}

/// WebSocket peer receiving one text message per result.
///
/// The upgrade handshake runs in [`WsSubscriber::accept`]; afterwards the
/// socket is write-only from our side. A write timeout bounds how long a
/// slow peer can hold the publisher.
pub struct WsSubscriber {
    socket: Mutex<WebSocket<TcpStream>>,
    peer: SocketAddr,
    open: AtomicBool,
}

impl WsSubscriber {
    /// Perform the WebSocket upgrade on an accepted connection.
    ///
    /// # Errors
    /// Returns [`BroadcastError::Handshake`] if the peer is not a WebSocket
    /// client or the exchange times out.
    pub fn accept(stream: TcpStream, write_timeout: Duration) -> Result<Self, BroadcastError> {
        let peer = stream
            .peer_addr()
            .map_err(|e| BroadcastError::Handshake(e.to_string()))?;
        configure(&stream, write_timeout).map_err(|e| BroadcastError::Handshake(e.to_string()))?;

        let socket =
            tungstenite::accept(stream).map_err(|e| BroadcastError::Handshake(format!("{peer}: {e}")))?;
        // Handshake done: reads are never issued again, drop the timeout.
        socket
            .get_ref()
            .set_read_timeout(None)
            .map_err(|e| BroadcastError::Handshake(e.to_string()))?;

        Ok(Self {
            socket: Mutex::new(socket),
            peer,
            open: AtomicBool::new(true),
        })
    }

    /// Remote address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

fn configure(stream: &TcpStream, write_timeout: Duration) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    stream.set_write_timeout(Some(write_timeout))
}

impl Subscriber for WsSubscriber {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    fn send(&self, message: &str) -> io::Result<()> {
        if !self.is_open() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "subscriber closed"));
        }
        let result = self.socket.lock().send(Message::text(message.to_string()));
        result.map_err(|e| {
            self.open.store(false, Ordering::Relaxed);
            match e {
                tungstenite::Error::Io(io) => io,
                other => io::Error::other(other.to_string()),
            }
        })
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::Relaxed) {
            let mut socket = self.socket.lock();
            // Best effort: the peer may already be gone.
            let _ = socket.close(None);
            let _ = socket.flush();
            let _ = socket.get_ref().shutdown(Shutdown::Both);
        }
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    /// Server-side subscriber plus the client end of a real WebSocket session.
    fn pair() -> (WsSubscriber, WebSocket<TcpStream>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            WsSubscriber::accept(stream, Duration::from_millis(250)).unwrap()
        });
        let stream = TcpStream::connect(addr).unwrap();
        let (client, response) = tungstenite::client(format!("ws://{addr}/"), stream).unwrap();
        assert_eq!(response.status().as_u16(), 101);
        (server.join().unwrap(), client)
    }

    #[test]
    fn messages_arrive_as_text_frames() {
        let (sub, mut client) = pair();
        sub.send("{\"a\":1}").unwrap();
        sub.send("{\"a\":2}").unwrap();

        let first = client.read().unwrap();
        assert!(first.is_text());
        assert_eq!(first.into_text().unwrap().as_str(), "{\"a\":1}");
        assert_eq!(client.read().unwrap().into_text().unwrap().as_str(), "{\"a\":2}");
    }

    #[test]
    fn close_sends_close_frame_and_refuses_sends() {
        let (sub, mut client) = pair();
        assert!(sub.is_open());
        sub.close();
        assert!(!sub.is_open());
        assert!(sub.send("x").is_err());
        assert!(client.read().unwrap().is_close());
        // Second close is a no-op.
        sub.close();
    }

    #[test]
    fn plain_http_request_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream
                .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .unwrap();
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest);
        });
        let (stream, _) = listener.accept().unwrap();
        let err = WsSubscriber::accept(stream, Duration::from_millis(250));
        assert!(matches!(err, Err(BroadcastError::Handshake(_))));
        client.join().unwrap();
    }
}
