//! ## memwatch-protocol::header
//! **The 16-byte header that precedes every message.**
//!
//! `session_id | command | status | length`, four big-endian `u32`s. The
//! `length` field counts payload bytes following the header.

use bytes::{Buf, BufMut};

use crate::{ensure_capacity, ensure_remaining, ProtocolError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Handshake; the reply carries the stat config on a new session.
    InitComm = 1,
    /// Full heap dump request and reply.
    Dump = 2,
    /// Periodic stat snapshot pushed by the server.
    CurStat = 3,
}

impl TryFrom<u32> for Command {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Command::InitComm),
            2 => Ok(Command::Dump),
            3 => Ok(Command::CurStat),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    Ack = 0,
    Error = 1,
}

impl TryFrom<u32> for Status {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Status::Ack),
            1 => Ok(Status::Error),
            other => Err(ProtocolError::UnknownStatus(other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtoHeader {
    pub session_id: u32,
    pub command: Command,
    pub status: Status,
    pub length: u32,
}

impl ProtoHeader {
    pub const ENCODED_SIZE: usize = 16;

    pub fn new(session_id: u32, command: Command, status: Status, length: u32) -> Self {
        Self {
            session_id,
            command,
            status,
            length,
        }
    }

    /// Header of an acknowledged reply carrying `length` payload bytes.
    pub fn ack(session_id: u32, command: Command, length: u32) -> Self {
        Self::new(session_id, command, Status::Ack, length)
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), ProtocolError> {
        ensure_capacity(buf, Self::ENCODED_SIZE)?;
        buf.put_u32(self.session_id);
        buf.put_u32(self.command as u32);
        buf.put_u32(self.status as u32);
        buf.put_u32(self.length);
        Ok(())
    }

    /// Encodes the header into a fixed array, handy for stamping the front
    /// of an already allocated buffer.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut out = [0u8; Self::ENCODED_SIZE];
        out[0..4].copy_from_slice(&self.session_id.to_be_bytes());
        out[4..8].copy_from_slice(&(self.command as u32).to_be_bytes());
        out[8..12].copy_from_slice(&(self.status as u32).to_be_bytes());
        out[12..16].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, ProtocolError> {
        ensure_remaining(&data, Self::ENCODED_SIZE, "protocol header")?;
        let session_id = data.get_u32();
        let command = Command::try_from(data.get_u32())?;
        let status = Status::try_from(data.get_u32())?;
        let length = data.get_u32();
        Ok(Self {
            session_id,
            command,
            status,
            length,
        })
    }
}
