//! DNP3 data-link frame validation.
//!
//! ```text
//! | 0x05 0x64 | len u8 | ctrl u8 | dest u16le | src u16le | crc u16le |   header block
//! | up to 16 user data bytes | crc u16le |                                  repeated
//! ```
//! `len` counts ctrl, dest, src and user data (CRCs excluded), so it is at least 5.

use thiserror::Error;

pub const START_BYTES: [u8; 2] = [0x05, 0x64];
pub const HEADER_LEN: usize = 10;
pub const BLOCK_LEN: usize = 16;
pub const MAX_USER_DATA: usize = 250;
pub const MAX_FRAME_LEN: usize = 292;
/// Transport header bit marking the first segment of a fragment.
pub const TRANSPORT_FIR: u8 = 0x40;

/// Reflected form of the DNP3 polynomial 0x3D65.
const CRC_POLY: u16 = 0xA6BC;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Dnp3Error {
    #[error("truncated link frame")]
    Truncated,

    #[error("bad start bytes")]
    BadStart,

    #[error("length field {0} out of range")]
    BadLength(u8),

    #[error("frame size does not match length field")]
    SizeMismatch,

    #[error("header CRC mismatch")]
    HeaderCrc,

    #[error("data block {0} CRC mismatch")]
    BlockCrc(usize),
}

/// CRC-16/DNP: reflected, init 0, final complement.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ CRC_POLY } else { crc >> 1 };
        }
    }
    !crc
}

fn check_crc(block: &[u8], crc: &[u8]) -> bool {
    crc16(block) == u16::from_le_bytes([crc[0], crc[1]])
}

/// Wire size of a frame carrying `user_data_len` bytes.
pub fn frame_len(user_data_len: usize) -> usize {
    let blocks = user_data_len.div_ceil(BLOCK_LEN);
    HEADER_LEN + user_data_len + blocks * 2
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    pub control: u8,
    pub destination: u16,
    pub source: u16,
    pub user_data: Vec<u8>,
}

impl LinkFrame {
    /// Parse one complete frame, verifying every CRC. Trailing bytes are rejected.
    pub fn parse(raw: &[u8]) -> Result<Self, Dnp3Error> {
        if raw.len() < HEADER_LEN {
            return Err(Dnp3Error::Truncated);
        }
        if raw[..2] != START_BYTES {
            return Err(Dnp3Error::BadStart);
        }
        let length = raw[2];
        if (length as usize) < 5 || length as usize - 5 > MAX_USER_DATA {
            return Err(Dnp3Error::BadLength(length));
        }
        let user_len = length as usize - 5;
        if raw.len() != frame_len(user_len) {
            return Err(Dnp3Error::SizeMismatch);
        }
        if !check_crc(&raw[..8], &raw[8..10]) {
            return Err(Dnp3Error::HeaderCrc);
        }

        let mut user_data = Vec::with_capacity(user_len);
        let mut cursor = HEADER_LEN;
        let mut remaining = user_len;
        let mut index = 0;
        while remaining > 0 {
            let n = remaining.min(BLOCK_LEN);
            let block = &raw[cursor..cursor + n];
            if !check_crc(block, &raw[cursor + n..cursor + n + 2]) {
                return Err(Dnp3Error::BlockCrc(index));
            }
            user_data.extend_from_slice(block);
            cursor += n + 2;
            remaining -= n;
            index += 1;
        }

        Ok(Self {
            control: raw[3],
            destination: u16::from_le_bytes([raw[4], raw[5]]),
            source: u16::from_le_bytes([raw[6], raw[7]]),
            user_data,
        })
    }

    /// Canonical encoding with freshly computed CRCs.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(frame_len(self.user_data.len()));
        out.extend_from_slice(&START_BYTES);
        out.push((self.user_data.len() + 5) as u8);
        out.push(self.control);
        out.extend_from_slice(&self.destination.to_le_bytes());
        out.extend_from_slice(&self.source.to_le_bytes());
        let crc = crc16(&out);
        out.extend_from_slice(&crc.to_le_bytes());

        for block in self.user_data.chunks(BLOCK_LEN) {
            out.extend_from_slice(block);
            out.extend_from_slice(&crc16(block).to_le_bytes());
        }
        out
    }

    /// Link-layer function code (low nibble of the control byte).
    pub fn link_function(&self) -> u8 {
        self.control & 0x0F
    }

    /// Primary-to-secondary direction bit.
    pub fn from_master(&self) -> bool {
        self.control & 0x80 != 0
    }

    /// Application function code, when the user data starts a fragment:
    /// transport header with FIR set, application control, function byte.
    /// Continuation segments carry no function code.
    pub fn function_code(&self) -> Option<u8> {
        let transport = *self.user_data.first()?;
        if transport & TRANSPORT_FIR == 0 {
            return None;
        }
        self.user_data.get(2).copied()
    }
}
