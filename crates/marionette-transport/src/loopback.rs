//! In-process transport for tests and single-process sessions

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use marionette_core::{MarionetteError, MarionetteResult, PeerId};
use parking_lot::Mutex;

use crate::Transport;

type Inboxes = HashMap<PeerId, VecDeque<(PeerId, Bytes)>>;

/// Shared switchboard connecting `LoopbackEndpoint`s
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inboxes: Arc<Mutex<Inboxes>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a peer; an existing inbox for it is reset
    pub fn endpoint(&self, peer: PeerId) -> LoopbackEndpoint {
        self.inboxes.lock().insert(peer, VecDeque::new());
        LoopbackEndpoint {
            peer,
            inboxes: Arc::clone(&self.inboxes),
        }
    }

    /// Detach a peer; later sends to it fail with `UnknownRecipient`
    pub fn disconnect(&self, peer: PeerId) {
        self.inboxes.lock().remove(&peer);
    }

    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<_> = self.inboxes.lock().keys().copied().collect();
        peers.sort();
        peers
    }

    /// Packets waiting for `peer`
    pub fn pending(&self, peer: PeerId) -> usize {
        self.inboxes.lock().get(&peer).map_or(0, VecDeque::len)
    }
}

/// One peer's view of a `LoopbackHub`
pub struct LoopbackEndpoint {
    peer: PeerId,
    inboxes: Arc<Mutex<Inboxes>>,
}

impl Transport for LoopbackEndpoint {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn send(&mut self, recipients: &[PeerId], payload: Bytes) -> MarionetteResult<()> {
        let mut inboxes = self.inboxes.lock();
        let mut unknown = None;

        for recipient in recipients {
            match inboxes.get_mut(recipient) {
                Some(inbox) => inbox.push_back((self.peer, payload.clone())),
                None => {
                    unknown.get_or_insert(*recipient);
                }
            }
        }

        match unknown {
            Some(peer) => Err(MarionetteError::UnknownRecipient(peer)),
            None => Ok(()),
        }
    }

    fn poll_receive(&mut self) -> Option<(PeerId, Bytes)> {
        self.inboxes.lock().get_mut(&self.peer)?.pop_front()
    }
}

impl Drop for LoopbackEndpoint {
    fn drop(&mut self) {
        self.inboxes.lock().remove(&self.peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout_to_recipients() {
        let hub = LoopbackHub::new();
        let mut a = hub.endpoint(PeerId::new(1));
        let mut b = hub.endpoint(PeerId::new(2));
        let mut c = hub.endpoint(PeerId::new(3));

        a.send(&[PeerId::new(2), PeerId::new(3)], Bytes::from_static(b"pose"))
            .unwrap();

        assert_eq!(
            b.poll_receive(),
            Some((PeerId::new(1), Bytes::from_static(b"pose")))
        );
        assert_eq!(c.drain().len(), 1);
        assert!(a.poll_receive().is_none());
    }

    #[test]
    fn test_unknown_recipient_still_delivers_to_known() {
        let hub = LoopbackHub::new();
        let mut a = hub.endpoint(PeerId::new(1));
        let mut b = hub.endpoint(PeerId::new(2));

        let result = a.send(&[PeerId::new(9), PeerId::new(2)], Bytes::from_static(b"x"));

        assert_eq!(result, Err(MarionetteError::UnknownRecipient(PeerId::new(9))));
        assert!(b.poll_receive().is_some());
    }

    #[test]
    fn test_dropped_endpoint_detaches() {
        let hub = LoopbackHub::new();
        let mut a = hub.endpoint(PeerId::new(1));
        {
            let _b = hub.endpoint(PeerId::new(2));
            assert_eq!(hub.peers(), vec![PeerId::new(1), PeerId::new(2)]);
        }

        assert!(a.send(&[PeerId::new(2)], Bytes::new()).is_err());
    }

    #[test]
    fn test_order_preserved_per_sender() {
        let hub = LoopbackHub::new();
        let mut a = hub.endpoint(PeerId::new(1));
        let mut b = hub.endpoint(PeerId::new(2));

        for i in 0..5u8 {
            a.send(&[PeerId::new(2)], Bytes::from(vec![i])).unwrap();
        }
        let got: Vec<u8> = b.drain().into_iter().map(|(_, p)| p[0]).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
        assert_eq!(hub.pending(PeerId::new(2)), 0);
    }
}
