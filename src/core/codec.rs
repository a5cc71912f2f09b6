//! Binary codec primitives shared by the WAL, MMR store, and the OTS / RFC 3161
//! anchor wire formats: fixed-width big-endian integers, LEB128 varints,
//! length-prefixed byte strings, and the hash/HMAC/CRC primitives every framed
//! format is built from.

use crate::core::errors::{WitnessError, WitnessResult};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Hard cap on a single length-prefixed byte string, matching the spec's
/// denial-of-service guard on untrusted wire input.
pub const MAX_VAR_BYTES_LEN: usize = 1024 * 1024;

pub fn put_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

pub fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

pub fn put_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

pub fn get_u8(data: &[u8], offset: &mut usize) -> WitnessResult<u8> {
    let b = *data
        .get(*offset)
        .ok_or_else(|| WitnessError::Malformed("truncated u8".into()))?;
    *offset += 1;
    Ok(b)
}

pub fn get_u16(data: &[u8], offset: &mut usize) -> WitnessResult<u16> {
    let bytes = read_exact(data, offset, 2)?;
    Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
}

pub fn get_u32(data: &[u8], offset: &mut usize) -> WitnessResult<u32> {
    let bytes = read_exact(data, offset, 4)?;
    Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
}

pub fn get_u64(data: &[u8], offset: &mut usize) -> WitnessResult<u64> {
    let bytes = read_exact(data, offset, 8)?;
    Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
}

pub fn get_i64(data: &[u8], offset: &mut usize) -> WitnessResult<i64> {
    let bytes = read_exact(data, offset, 8)?;
    Ok(i64::from_be_bytes(bytes.try_into().unwrap()))
}

fn read_exact<'a>(data: &'a [u8], offset: &mut usize, len: usize) -> WitnessResult<&'a [u8]> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| WitnessError::Malformed("length overflow".into()))?;
    let slice = data
        .get(*offset..end)
        .ok_or_else(|| WitnessError::Malformed("truncated field".into()))?;
    *offset = end;
    Ok(slice)
}

/// LEB128-style varint: 7 data bits per byte, MSB is the continuation flag.
pub fn put_varint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

pub fn get_varint(data: &[u8], offset: &mut usize) -> WitnessResult<u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = get_u8(data, offset)?;
        if shift >= 64 {
            return Err(WitnessError::Malformed("varint shift overflow".into()));
        }
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(result)
}

pub fn put_var_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    put_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

pub fn get_var_bytes<'a>(data: &'a [u8], offset: &mut usize) -> WitnessResult<&'a [u8]> {
    let len = get_varint(data, offset)? as usize;
    if len > MAX_VAR_BYTES_LEN {
        return Err(WitnessError::Malformed(format!(
            "var-bytes length {} exceeds cap {}",
            len, MAX_VAR_BYTES_LEN
        )));
    }
    read_exact(data, offset, len)
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

pub fn crc32_ieee(data: &[u8]) -> u32 {
    const CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
    CRC.checksum(data)
}

/// Constant-time equality check, used wherever the spec demands that a
/// tampering attempt not be distinguishable by timing (VDF and signature
/// verification).
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
