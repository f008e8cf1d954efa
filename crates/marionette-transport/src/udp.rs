//! UDP transport
//!
//! Datagram layout: `[sender PeerId: 8 bytes LE][payload]`. Peers are
//! addressed through a directory filled by the session layer.
//!
//! Receiving runs on a tokio task. Sending goes through a non-blocking
//! clone of the same socket so `send` can be called from the frame loop
//! without awaiting.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use marionette_core::{MarionetteError, MarionetteResult, PeerId};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Sender id prefix size
pub const SENDER_PREFIX_SIZE: usize = 8;

/// Largest datagram accepted or sent
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Default receive queue depth
pub const DEFAULT_RECEIVE_QUEUE: usize = 1024;

/// Packet receiver channel
pub type PacketReceiver = mpsc::Receiver<(Bytes, SocketAddr)>;

/// UDP endpoint implementing `Transport`
///
/// Must be created inside a tokio runtime; the receive loop runs as a
/// spawned task and hands datagrams to `poll_receive` through a channel.
pub struct UdpTransport {
    local_peer: PeerId,
    send_socket: std::net::UdpSocket,
    local_addr: SocketAddr,
    directory: HashMap<PeerId, SocketAddr>,
    incoming: PacketReceiver,
}

impl UdpTransport {
    /// Bind to a local address and start receiving
    pub async fn bind(local_peer: PeerId, addr: SocketAddr) -> MarionetteResult<Self> {
        let std_socket = std::net::UdpSocket::bind(addr).map_err(transport_error)?;
        std_socket.set_nonblocking(true).map_err(transport_error)?;
        let local_addr = std_socket.local_addr().map_err(transport_error)?;
        let send_socket = std_socket.try_clone().map_err(transport_error)?;

        let socket = UdpSocket::from_std(std_socket).map_err(transport_error)?;
        let incoming = start_receive_loop(Arc::new(socket), DEFAULT_RECEIVE_QUEUE);

        Ok(UdpTransport {
            local_peer,
            send_socket,
            local_addr,
            directory: HashMap::new(),
            incoming,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Register where a peer is reachable
    pub fn add_peer(&mut self, peer: PeerId, addr: SocketAddr) {
        self.directory.insert(peer, addr);
    }

    pub fn remove_peer(&mut self, peer: PeerId) -> Option<SocketAddr> {
        self.directory.remove(&peer)
    }

    pub fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.directory.get(&peer).copied()
    }

    fn datagram(&self, payload: &[u8]) -> MarionetteResult<Bytes> {
        let len = SENDER_PREFIX_SIZE + payload.len();
        if len > MAX_DATAGRAM_SIZE {
            return Err(MarionetteError::TransportError(format!(
                "datagram of {} bytes exceeds {}",
                len, MAX_DATAGRAM_SIZE
            )));
        }
        let mut buf = BytesMut::with_capacity(len);
        buf.put_slice(&self.local_peer.to_bytes());
        buf.put_slice(payload);
        Ok(buf.freeze())
    }
}

impl crate::Transport for UdpTransport {
    fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    fn send(&mut self, recipients: &[PeerId], payload: Bytes) -> MarionetteResult<()> {
        let datagram = self.datagram(&payload)?;
        let mut unknown = None;

        for recipient in recipients {
            let Some(addr) = self.directory.get(recipient) else {
                unknown.get_or_insert(*recipient);
                continue;
            };
            match self.send_socket.send_to(&datagram, *addr) {
                Ok(_) => {}
                // Send buffer full: same as loss on the wire
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    trace!(peer = ?recipient, "UDP send would block, dropping");
                }
                Err(e) => return Err(transport_error(e)),
            }
        }

        match unknown {
            Some(peer) => Err(MarionetteError::UnknownRecipient(peer)),
            None => Ok(()),
        }
    }

    fn poll_receive(&mut self) -> Option<(PeerId, Bytes)> {
        loop {
            let (mut datagram, from) = self.incoming.try_recv().ok()?;
            if datagram.len() < SENDER_PREFIX_SIZE {
                trace!(%from, len = datagram.len(), "dropping runt datagram");
                continue;
            }
            let payload = datagram.split_off(SENDER_PREFIX_SIZE);
            let mut id = [0u8; SENDER_PREFIX_SIZE];
            id.copy_from_slice(&datagram);
            return Some((PeerId::from_bytes(id), payload));
        }
    }
}

fn transport_error(e: io::Error) -> MarionetteError {
    MarionetteError::TransportError(e.to_string())
}

/// Start a background receive loop
pub fn start_receive_loop(socket: Arc<UdpSocket>, queue: usize) -> PacketReceiver {
    let (tx, rx) = mpsc::channel(queue.max(1));

    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, addr)) => {
                    let packet = Bytes::copy_from_slice(&buf[..len]);
                    if tx.send((packet, addr)).await.is_err() {
                        break; // Transport dropped
                    }
                }
                Err(e) => {
                    warn!("UDP receive error: {}", e);
                }
            }
        }
    });

    rx
}
