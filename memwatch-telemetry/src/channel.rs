//! ## memwatch-telemetry::channel
//! **The byte-stream seam between an endpoint and its transport.**
//!
//! Endpoints never own sockets. The transport owns the connection and drives
//! the endpoint through four notifications: open, packet received, packet
//! delivered and closed. In the other direction the endpoint hands chunks to
//! [`Channel::send`]; the transport reports each one back through
//! `on_packet_delivered` once it is on the wire.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,

    #[error("Channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait Channel {
    /// Queues one chunk. At most one chunk per endpoint is outstanding
    /// until it is reported delivered.
    fn send(&mut self, chunk: &[u8]) -> Result<(), ChannelError>;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn send(&mut self, chunk: &[u8]) -> Result<(), ChannelError> {
        (**self).send(chunk)
    }
}

/// Collects sent chunks until the transport takes them.
#[derive(Debug, Default)]
pub struct BufferedChannel {
    pending: Vec<bytes::Bytes>,
    closed: bool,
}

impl BufferedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks sent since the last call, oldest first.
    pub fn take_pending(&mut self) -> Vec<bytes::Bytes> {
        std::mem::take(&mut self.pending)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Refuse further sends.
    pub fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
    }
}

impl Channel for BufferedChannel {
    fn send(&mut self, chunk: &[u8]) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        self.pending.push(bytes::Bytes::copy_from_slice(chunk));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_channel_collects_in_order() {
        let mut channel = BufferedChannel::new();
        channel.send(b"one").unwrap();
        channel.send(b"two").unwrap();
        assert!(channel.has_pending());
        assert_eq!(channel.take_pending(), vec![&b"one"[..], &b"two"[..]]);
        assert!(!channel.has_pending());

        channel.close();
        assert!(matches!(channel.send(b"late"), Err(ChannelError::Closed)));
    }
}
