//! Listening/connected socket pair
//!
//! An [`Endpoint`] owns at most one listener and one connected stream and
//! tracks where it is in its lifecycle. The coordinator's primary channel
//! and every worker use the same type.

use crate::distributed::protocol::{read_message, write_message};
use crate::error::SessionError;
use crate::Result;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace};

/// Lifecycle of an [`Endpoint`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unbound,
    Listening,
    Connected,
    Closed,
}

/// One listening socket and the single peer connection it accepts
///
/// Messages can only be exchanged in [`ConnectionState::Connected`]. Sockets
/// are released by [`Endpoint::close`] or, failing that, when the endpoint
/// is dropped.
#[derive(Debug)]
pub struct Endpoint {
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
    local_port: Option<u16>,
    peer_address: Option<SocketAddr>,
    state: ConnectionState,
}

impl Endpoint {
    /// Create an unbound endpoint
    pub fn new() -> Self {
        Self {
            listener: None,
            stream: None,
            local_port: None,
            peer_address: None,
            state: ConnectionState::Unbound,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Bound port, once binding succeeded
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.peer_address
    }

    /// Bind a listener on the first free port in `[min_port, max_port)`
    ///
    /// Ports are tried in ascending order.
    pub async fn bind(&mut self, address: IpAddr, min_port: u16, max_port: u16) -> Result<u16> {
        if self.state != ConnectionState::Unbound {
            return Err(not_in_state("bind", self.state));
        }

        for port in min_port..max_port {
            match TcpListener::bind((address, port)).await {
                Ok(listener) => {
                    debug!("Bound listener on {}:{}", address, port);
                    self.listener = Some(listener);
                    self.local_port = Some(port);
                    self.state = ConnectionState::Listening;
                    return Ok(port);
                }
                Err(e) => {
                    trace!("Port {} unavailable: {}", port, e);
                }
            }
        }

        Err(SessionError::NoPortAvailable { min: min_port, max: max_port })
    }

    /// Wait for one peer to connect
    ///
    /// The listener is released once a peer is accepted; an endpoint serves
    /// a single connection. Times out with [`SessionError::IdleTimeout`] and
    /// stays `Listening` so the caller may retry.
    pub async fn accept(&mut self, timeout: Duration) -> Result<SocketAddr> {
        let listener = match (self.state, self.listener.as_ref()) {
            (ConnectionState::Listening, Some(listener)) => listener,
            _ => return Err(not_in_state("accept", self.state)),
        };

        let (stream, peer) = tokio::time::timeout(timeout, listener.accept())
            .await
            .map_err(|_| SessionError::IdleTimeout(timeout))??;

        stream.set_nodelay(true)?;
        self.listener = None;
        self.stream = Some(stream);
        self.peer_address = Some(peer);
        self.state = ConnectionState::Connected;
        Ok(peer)
    }

    /// Read one message, waiting at most `timeout`
    pub async fn read_message(&mut self, timeout: Duration) -> Result<i32> {
        let stream = self.connected_stream("read")?;
        let value = tokio::time::timeout(timeout, read_message(stream))
            .await
            .map_err(|_| SessionError::IdleTimeout(timeout))??;
        trace!("Received message: {}", value);
        Ok(value)
    }

    /// Send one message, waiting at most `timeout`
    ///
    /// A peer that stops reading eventually fills the socket buffers; the
    /// write then fails with [`SessionError::IdleTimeout`].
    pub async fn write_message(&mut self, value: i32, timeout: Duration) -> Result<()> {
        let stream = self.connected_stream("write")?;
        tokio::time::timeout(timeout, write_message(stream, value))
            .await
            .map_err(|_| SessionError::IdleTimeout(timeout))??;
        trace!("Sent message: {}", value);
        Ok(())
    }

    /// Release both sockets
    ///
    /// Safe to call in any state and more than once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of stream failed: {}", e);
            }
        }
        self.listener = None;
        if self.state != ConnectionState::Closed {
            debug!("Closed endpoint (port {:?})", self.local_port);
        }
        self.state = ConnectionState::Closed;
    }

    fn connected_stream(&mut self, op: &str) -> Result<&mut TcpStream> {
        match (self.state, self.stream.as_mut()) {
            (ConnectionState::Connected, Some(stream)) => Ok(stream),
            (state, _) => Err(not_in_state(op, state)),
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new()
    }
}

fn not_in_state(op: &str, state: ConnectionState) -> SessionError {
    SessionError::Transport(io::Error::new(
        io::ErrorKind::NotConnected,
        format!("cannot {} in state {:?}", op, state),
    ))
}
