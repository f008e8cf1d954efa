//! Transport contract

use bytes::Bytes;
use marionette_core::{MarionetteResult, PeerId};

/// Unreliable datagram channel between peers
pub trait Transport: Send {
    /// Identity this endpoint sends as
    fn local_peer(&self) -> PeerId;

    /// Send `payload` to every recipient
    ///
    /// Known recipients are always attempted; if any recipient is unknown
    /// the call returns `UnknownRecipient` for the first one afterwards.
    fn send(&mut self, recipients: &[PeerId], payload: Bytes) -> MarionetteResult<()>;

    /// Next received packet, if any; never blocks
    fn poll_receive(&mut self) -> Option<(PeerId, Bytes)>;

    /// Drain everything currently received
    fn drain(&mut self) -> Vec<(PeerId, Bytes)> {
        std::iter::from_fn(|| self.poll_receive()).collect()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn local_peer(&self) -> PeerId {
        (**self).local_peer()
    }

    fn send(&mut self, recipients: &[PeerId], payload: Bytes) -> MarionetteResult<()> {
        (**self).send(recipients, payload)
    }

    fn poll_receive(&mut self) -> Option<(PeerId, Bytes)> {
        (**self).poll_receive()
    }
}
