//! Modbus/TCP request ADU parsing and canonical encoding.
//!
//! ```text
//! | transaction id u16 | protocol id u16 (=0) | length u16 | unit id u8 | function u8 | data... |
//! ```
//! `length` counts the unit id, function code and data bytes. All fields big-endian.

use thiserror::Error;

pub const MBAP_HEADER_LEN: usize = 7;
/// Largest ADU permitted by the Modbus/TCP specification.
pub const MAX_ADU_LEN: usize = 260;

/// Public function codes accepted in requests.
const PUBLIC_FUNCTION_CODES: [u8; 19] = [1, 2, 3, 4, 5, 6, 7, 8, 11, 12, 15, 16, 17, 20, 21, 22, 23, 24, 43];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModbusError {
    #[error("truncated MBAP header")]
    Truncated,

    #[error("ADU exceeds {MAX_ADU_LEN} bytes")]
    TooLong,

    #[error("unsupported protocol identifier {0}")]
    ProtocolId(u16),

    #[error("length field mismatch")]
    LengthMismatch,

    #[error("invalid function code")]
    InvalidFunctionCode(u8),

    #[error("invalid data length for function {0}")]
    InvalidDataLength(u8),

    #[error("quantity {0} out of range")]
    InvalidQuantity(u16),

    #[error("byte count mismatch")]
    ByteCountMismatch,

    #[error("invalid coil value 0x{0:04x}")]
    InvalidCoilValue(u16),
}

/// A validated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusRequest {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub function_code: u8,
    pub data: Vec<u8>,
}

#[inline]
fn be16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn check_quantity(quantity: u16, max: u16) -> Result<(), ModbusError> {
    if quantity == 0 || quantity > max {
        return Err(ModbusError::InvalidQuantity(quantity));
    }
    Ok(())
}

/// Per-function shape checks on the PDU data.
fn validate_data(function: u8, data: &[u8]) -> Result<(), ModbusError> {
    let bad_len = || ModbusError::InvalidDataLength(function);
    match function {
        1 | 2 => {
            if data.len() != 4 {
                return Err(bad_len());
            }
            check_quantity(be16(data, 2), 2000)
        }
        3 | 4 => {
            if data.len() != 4 {
                return Err(bad_len());
            }
            check_quantity(be16(data, 2), 125)
        }
        5 => {
            if data.len() != 4 {
                return Err(bad_len());
            }
            match be16(data, 2) {
                0xFF00 | 0x0000 => Ok(()),
                other => Err(ModbusError::InvalidCoilValue(other)),
            }
        }
        6 => {
            if data.len() != 4 {
                return Err(bad_len());
            }
            Ok(())
        }
        15 | 16 => {
            if data.len() < 5 {
                return Err(bad_len());
            }
            let quantity = be16(data, 2);
            let expected = if function == 15 {
                check_quantity(quantity, 1968)?;
                quantity.div_ceil(8) as usize
            } else {
                check_quantity(quantity, 123)?;
                quantity as usize * 2
            };
            let byte_count = data[4] as usize;
            if byte_count != expected || data.len() != 5 + byte_count {
                return Err(ModbusError::ByteCountMismatch);
            }
            Ok(())
        }
        23 => {
            if data.len() < 9 {
                return Err(bad_len());
            }
            check_quantity(be16(data, 2), 125)?;
            let write_quantity = be16(data, 6);
            check_quantity(write_quantity, 121)?;
            let byte_count = data[8] as usize;
            if byte_count != write_quantity as usize * 2 || data.len() != 9 + byte_count {
                return Err(ModbusError::ByteCountMismatch);
            }
            Ok(())
        }
        7 | 11 | 12 | 17 => {
            if !data.is_empty() {
                return Err(bad_len());
            }
            Ok(())
        }
        8 => {
            if data.len() < 2 {
                return Err(bad_len());
            }
            Ok(())
        }
        20 | 21 => {
            if data.is_empty() || data[0] as usize != data.len() - 1 {
                return Err(ModbusError::ByteCountMismatch);
            }
            Ok(())
        }
        22 => {
            if data.len() != 6 {
                return Err(bad_len());
            }
            Ok(())
        }
        24 => {
            if data.len() != 2 {
                return Err(bad_len());
            }
            Ok(())
        }
        43 => {
            if data.is_empty() {
                return Err(bad_len());
            }
            Ok(())
        }
        other => Err(ModbusError::InvalidFunctionCode(other)),
    }
}

impl ModbusRequest {
    /// Parse and validate one request ADU. Trailing bytes are rejected.
    pub fn parse(adu: &[u8]) -> Result<Self, ModbusError> {
        if adu.len() < MBAP_HEADER_LEN + 1 {
            return Err(ModbusError::Truncated);
        }
        if adu.len() > MAX_ADU_LEN {
            return Err(ModbusError::TooLong);
        }

        let protocol_id = be16(adu, 2);
        if protocol_id != 0 {
            return Err(ModbusError::ProtocolId(protocol_id));
        }
        if be16(adu, 4) as usize != adu.len() - 6 {
            return Err(ModbusError::LengthMismatch);
        }

        let function_code = adu[7];
        if !PUBLIC_FUNCTION_CODES.contains(&function_code) {
            return Err(ModbusError::InvalidFunctionCode(function_code));
        }
        let data = &adu[MBAP_HEADER_LEN + 1..];
        validate_data(function_code, data)?;

        Ok(Self {
            transaction_id: be16(adu, 0),
            unit_id: adu[6],
            function_code,
            data: data.to_vec(),
        })
    }

    /// Canonical ADU: protocol id zero, length recomputed.
    pub fn encode(&self) -> Vec<u8> {
        let mut adu = Vec::with_capacity(MBAP_HEADER_LEN + 1 + self.data.len());
        adu.extend_from_slice(&self.transaction_id.to_be_bytes());
        adu.extend_from_slice(&0u16.to_be_bytes());
        adu.extend_from_slice(&((self.data.len() + 2) as u16).to_be_bytes());
        adu.push(self.unit_id);
        adu.push(self.function_code);
        adu.extend_from_slice(&self.data);
        adu
    }

    /// First data address the request touches, for addressed functions.
    /// For function 23 this is the read start; see `spans` for both blocks.
    pub fn address(&self) -> Option<u16> {
        match self.function_code {
            1 | 2 | 3 | 4 | 5 | 6 | 15 | 16 | 22 | 23 => Some(be16(&self.data, 0)),
            _ => None,
        }
    }

    /// Number of coils/registers in the block starting at `address`.
    pub fn quantity(&self) -> Option<u16> {
        match self.function_code {
            1 | 2 | 3 | 4 | 15 | 16 | 23 => Some(be16(&self.data, 2)),
            5 | 6 | 22 => Some(1),
            _ => None,
        }
    }

    /// Every `(start, quantity)` block the request reads or writes.
    /// Function 23 touches two: the read block and the write block.
    pub fn spans(&self) -> Vec<(u16, u16)> {
        match (self.address(), self.quantity()) {
            (Some(start), Some(quantity)) if self.function_code == 23 => {
                vec![(start, quantity), (be16(&self.data, 4), be16(&self.data, 6))]
            }
            (Some(start), Some(quantity)) => vec![(start, quantity)],
            _ => Vec::new(),
        }
    }

    /// Whether the function modifies device state.
    pub fn is_write(&self) -> bool {
        matches!(self.function_code, 5 | 6 | 15 | 16 | 21 | 22 | 23)
    }
}
