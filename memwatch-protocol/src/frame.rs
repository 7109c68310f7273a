//! ## memwatch-protocol::frame
//! **Reassembles whole messages from a chunked byte stream.**
//!
//! Transports deliver bytes in whatever pieces they like. The assembler
//! buffers them and yields one `(ProtoHeader, payload)` at a time once the
//! full payload has arrived. A header that cannot be decoded means the
//! stream is out of sync: the error is returned once and everything buffered
//! is dropped. A well-formed header announcing a payload over the configured
//! limit is reported the same way, but its payload is skipped as it arrives
//! so the frames after it still line up.

use bytes::{Buf, Bytes, BytesMut};

use crate::{ProtoHeader, ProtocolError};

#[derive(Debug)]
pub struct FrameAssembler {
    buffer: BytesMut,
    max_payload: u32,
    /// Payload bytes of a rejected frame not received yet.
    discard: usize,
}

impl FrameAssembler {
    pub fn new(max_payload: u32) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_payload,
            discard: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        let skipped = self.discard.min(data.len());
        self.discard -= skipped;
        self.buffer.extend_from_slice(&data[skipped..]);
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discard = 0;
    }

    /// Next complete frame, `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Result<(ProtoHeader, Bytes), ProtocolError>> {
        if self.buffer.len() < ProtoHeader::ENCODED_SIZE {
            return None;
        }
        let header = match ProtoHeader::decode(&self.buffer) {
            Ok(header) => header,
            Err(err) => {
                self.reset();
                return Some(Err(err));
            }
        };
        if header.length > self.max_payload {
            self.buffer.advance(ProtoHeader::ENCODED_SIZE);
            let length = header.length as usize;
            let skipped = length.min(self.buffer.len());
            self.buffer.advance(skipped);
            self.discard = length - skipped;
            return Some(Err(ProtocolError::PayloadTooLarge {
                length: header.length,
                limit: self.max_payload,
            }));
        }
        let total = ProtoHeader::ENCODED_SIZE + header.length as usize;
        if self.buffer.len() < total {
            return None;
        }
        self.buffer.advance(ProtoHeader::ENCODED_SIZE);
        let payload = self.buffer.split_to(header.length as usize).freeze();
        Some(Ok((header, payload)))
    }
}

impl Iterator for FrameAssembler {
    type Item = Result<(ProtoHeader, Bytes), ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Command;

    fn frame(session: u32, command: Command, payload: &[u8]) -> Vec<u8> {
        let mut out = ProtoHeader::ack(session, command, payload.len() as u32)
            .to_bytes()
            .to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_frame_split_across_pushes() {
        let bytes = frame(5, Command::Dump, b"hello world");
        let mut assembler = FrameAssembler::new(64);

        assembler.push(&bytes[..10]);
        assert!(assembler.next_frame().is_none());
        assembler.push(&bytes[10..20]);
        assert!(assembler.next_frame().is_none());
        assembler.push(&bytes[20..]);

        let (header, payload) = assembler.next_frame().unwrap().unwrap();
        assert_eq!(header.command, Command::Dump);
        assert_eq!(&payload[..], b"hello world");
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_several_frames_in_one_push() {
        let mut bytes = frame(1, Command::InitComm, &[]);
        bytes.extend(frame(1, Command::CurStat, &[1, 2, 3]));
        let mut assembler = FrameAssembler::new(64);
        assembler.push(&bytes);

        let frames: Vec<_> = assembler.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0.command, Command::InitComm);
        assert!(frames[0].1.is_empty());
        assert_eq!(&frames[1].1[..], &[1, 2, 3]);
    }

    #[test]
    fn test_oversized_payload_is_skipped() {
        let mut assembler = FrameAssembler::new(4);
        assembler.push(&frame(1, Command::Dump, &[0; 8]));
        assert!(matches!(
            assembler.next_frame(),
            Some(Err(ProtocolError::PayloadTooLarge { length: 8, limit: 4 }))
        ));
        assert_eq!(assembler.buffered(), 0);

        assembler.push(&frame(1, Command::Dump, &[]));
        assert!(assembler.next_frame().unwrap().is_ok());
    }

    #[test]
    fn test_oversized_payload_skipped_across_pushes() {
        let big = frame(1, Command::Dump, &[0x01; 40]);
        let mut next = frame(1, Command::CurStat, &[7, 7]);
        let mut assembler = FrameAssembler::new(16);

        assembler.push(&big[..20]);
        assert!(matches!(
            assembler.next_frame(),
            Some(Err(ProtocolError::PayloadTooLarge { length: 40, .. }))
        ));
        assert!(assembler.next_frame().is_none());
        assembler.push(&big[20..30]);
        let mut tail = big[30..].to_vec();
        tail.append(&mut next);
        assembler.push(&tail);

        let (header, payload) = assembler.next_frame().unwrap().unwrap();
        assert_eq!(header.command, Command::CurStat);
        assert_eq!(&payload[..], &[7, 7]);
        assert!(assembler.next_frame().is_none());
    }

    #[test]
    fn test_garbage_header_resets() {
        let mut assembler = FrameAssembler::new(64);
        assembler.push(&[0xff; 20]);
        assert!(matches!(
            assembler.next_frame(),
            Some(Err(ProtocolError::UnknownCommand(_)))
        ));
        assert!(assembler.next_frame().is_none());
    }
}
