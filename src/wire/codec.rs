use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::PublicKey;

use crate::errors::{DecodeError, EncodeError};

// ============================================================================
// READER
// ============================================================================

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// BOLT 1 BigSize. Values that fit a shorter form are rejected.
    pub fn read_bigsize(&mut self) -> Result<u64, DecodeError> {
        let value = match self.read_u8()? {
            0xff => {
                let v = self.read_u64()?;
                if v < 0x1_0000_0000 {
                    return Err(DecodeError::NonMinimalVarint);
                }
                v
            }
            0xfe => {
                let v = self.read_u32()? as u64;
                if v < 0x1_0000 {
                    return Err(DecodeError::NonMinimalVarint);
                }
                v
            }
            0xfd => {
                let v = self.read_u16()? as u64;
                if v < 0xfd {
                    return Err(DecodeError::NonMinimalVarint);
                }
                v
            }
            small => small as u64,
        };
        Ok(value)
    }

    /// A u16 length followed by that many bytes.
    pub fn read_u16_prefixed(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_u16()? as usize;
        if self.remaining() < len {
            return Err(DecodeError::LengthMismatch {
                declared: len as u64,
                remaining: self.remaining(),
            });
        }
        Ok(self.read_bytes(len)?.to_vec())
    }

    pub fn read_pubkey(&mut self) -> Result<PublicKey, DecodeError> {
        let bytes = self.read_bytes(33)?;
        PublicKey::from_slice(bytes).map_err(|_| DecodeError::InvalidPublicKey)
    }

    pub fn read_signature(&mut self) -> Result<Signature, DecodeError> {
        let bytes = self.read_bytes(64)?;
        Signature::from_compact(bytes).map_err(|_| DecodeError::InvalidSignature)
    }

    /// Consumes everything left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

// ============================================================================
// WRITER
// ============================================================================

#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_bigsize(&mut self, v: u64) {
        match v {
            0..=0xfc => self.write_u8(v as u8),
            0xfd..=0xffff => {
                self.write_u8(0xfd);
                self.write_u16(v as u16);
            }
            0x1_0000..=0xffff_ffff => {
                self.write_u8(0xfe);
                self.write_u32(v as u32);
            }
            _ => {
                self.write_u8(0xff);
                self.write_u64(v);
            }
        }
    }

    pub fn write_u16_prefixed(&mut self, field: &'static str, bytes: &[u8]) -> Result<(), EncodeError> {
        let len = u16::try_from(bytes.len()).map_err(|_| EncodeError::FieldTooLong {
            field,
            len: bytes.len(),
            max: u16::MAX as usize,
        })?;
        self.write_u16(len);
        self.write_bytes(bytes);
        Ok(())
    }

    pub fn write_pubkey(&mut self, key: &PublicKey) {
        self.write_bytes(&key.serialize());
    }

    pub fn write_signature(&mut self, sig: &Signature) {
        self.write_bytes(&sig.serialize_compact());
    }
}
