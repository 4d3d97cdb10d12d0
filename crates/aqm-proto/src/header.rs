//! Frame header with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 12-byte structure serialized as raw binary
//! (big endian). The broker reads it first to learn how many payload bytes
//! follow and which payload type to decode.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Operation codes. Requests occupy `0x01..=0x7F`, responses `0x80..=0xFF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Publish a batch of coins.
    Publish = 0x01,
    /// Fetch one coin of a tier for a user.
    Fetch = 0x02,
    /// Route one packet to a mailbox.
    Send = 0x03,
    /// Drain a mailbox.
    Drain = 0x04,
    /// Count a user's published coins per tier.
    Count = 0x05,

    /// Publish accepted.
    PublishAck = 0x81,
    /// Fetched coin.
    CoinGranted = 0x82,
    /// Nothing matched.
    NotFound = 0x83,
    /// Packet routed.
    SendAck = 0x84,
    /// Drained packets.
    Mailbox = 0x85,
    /// Per-tier counts.
    Counts = 0x86,
    /// Request rejected.
    Error = 0xFF,
}

impl Opcode {
    /// Raw opcode byte.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse an opcode byte. `None` if unassigned.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Publish),
            0x02 => Some(Self::Fetch),
            0x03 => Some(Self::Send),
            0x04 => Some(Self::Drain),
            0x05 => Some(Self::Count),
            0x81 => Some(Self::PublishAck),
            0x82 => Some(Self::CoinGranted),
            0x83 => Some(Self::NotFound),
            0x84 => Some(Self::SendAck),
            0x85 => Some(Self::Mailbox),
            0x86 => Some(Self::Counts),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }

    /// True for client-to-broker opcodes.
    #[must_use]
    pub const fn is_request(self) -> bool {
        self.to_u8() < 0x80
    }
}

/// Fixed 12-byte frame header (big endian).
///
/// Fields are raw byte arrays so every 12-byte pattern is a valid value and
/// the struct can be cast directly from untrusted network bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    magic: [u8; 4],   // "AQMB"
    version: u8,      // 0x01
    pub(crate) opcode: u8,
    reserved: [u8; 2],
    pub(crate) payload_size: [u8; 4],
}

impl FrameHeader {
    /// Size of the serialized header.
    pub const SIZE: usize = 12;

    /// Magic number: "AQMB" in ASCII.
    pub const MAGIC: u32 = 0x4151_4D42;

    /// Current protocol version.
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (4 MB).
    pub const MAX_PAYLOAD_SIZE: u32 = 4 * 1024 * 1024;

    /// Create a header for `opcode` with an empty payload.
    #[must_use]
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            opcode: opcode.to_u8(),
            reserved: [0; 2],
            payload_size: [0; 4],
        }
    }

    /// Parse a header from the front of `bytes` without copying.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if fewer than 12 bytes are available
    /// - `ProtocolError::InvalidMagic` if the magic number is wrong
    /// - `ProtocolError::UnsupportedVersion` for any other version
    /// - `ProtocolError::PayloadTooLarge` if the claimed size exceeds the limit
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let (header, _) = Self::ref_from_prefix(bytes).map_err(|_| {
            ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() }
        })?;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = header.payload_size();
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(self.as_bytes());
        arr
    }

    /// Raw opcode byte.
    #[must_use]
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Opcode as enum. `None` if unassigned.
    #[must_use]
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }
}
