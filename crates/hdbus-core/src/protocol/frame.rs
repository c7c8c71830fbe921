//! Multipart frame codec (panic-free).
//!
//! A frame on a byte stream is:
//!
//! ```text
//! u32 body_len | u16 part_count | (u32 part_len | part bytes) * part_count
//! ```
//!
//! All integers are big-endian. `body_len` covers everything after itself.
//!
//! Parsing rules:
//! - Never index (`buf[0]`); use `Buf` and `remaining()` checks.
//! - Never `unwrap()` / `expect()` / `panic!()` in production paths.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{HdbusError, Result};

/// Length of the outer `body_len` prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Upper bound on parts per frame.
pub const MAX_PARTS: u16 = 16;

/// Encode parts into one length-prefixed frame.
pub fn encode_frame(parts: &[Bytes]) -> Result<Bytes> {
    let count = u16::try_from(parts.len())
        .ok()
        .filter(|c| *c <= MAX_PARTS)
        .ok_or_else(|| HdbusError::Transport(format!("too many parts: {}", parts.len())))?;

    let body_len = parts.iter().map(|p| 4 + p.len()).sum::<usize>() + 2;
    let body_len = u32::try_from(body_len)
        .map_err(|_| HdbusError::Transport("frame too large".into()))?;

    let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + body_len as usize);
    out.put_u32(body_len);
    out.put_u16(count);
    for part in parts {
        // bounded by the body_len conversion above
        out.put_u32(part.len() as u32);
        out.put_slice(part);
    }
    Ok(out.freeze())
}

/// Read the body length from a frame header.
pub fn body_len(mut header: &[u8]) -> Result<usize> {
    if header.remaining() < FRAME_HEADER_LEN {
        return Err(HdbusError::Transport("frame header too short".into()));
    }
    Ok(header.get_u32() as usize)
}

/// Decode a frame body (everything after the `body_len` prefix) into parts.
pub fn decode_body(mut buf: Bytes) -> Result<Vec<Bytes>> {
    if buf.remaining() < 2 {
        return Err(HdbusError::Transport("frame body too short".into()));
    }
    let count = buf.get_u16();
    if count > MAX_PARTS {
        return Err(HdbusError::Transport(format!("too many parts: {count}")));
    }

    let mut parts = Vec::with_capacity(count as usize);
    for i in 0..count {
        if buf.remaining() < 4 {
            return Err(HdbusError::Transport(format!("part {i} missing length")));
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(HdbusError::Transport(format!(
                "part {i} truncated: want {len}, have {}",
                buf.remaining()
            )));
        }
        parts.push(buf.copy_to_bytes(len));
    }

    if buf.has_remaining() {
        return Err(HdbusError::Transport(format!(
            "{} trailing bytes after {count} parts",
            buf.remaining()
        )));
    }
    Ok(parts)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn header_reports_body_length() {
        let frame = encode_frame(&[Bytes::from_static(b"abc")]).unwrap();
        let len = body_len(&frame[..FRAME_HEADER_LEN]).unwrap();
        assert_eq!(len, frame.len() - FRAME_HEADER_LEN);
        assert_eq!(len, 2 + 4 + 3);
    }

    #[test]
    fn empty_parts_survive() {
        let parts = vec![Bytes::new(), Bytes::from_static(b"payload")];
        let frame = encode_frame(&parts).unwrap();
        let body = frame.slice(FRAME_HEADER_LEN..);
        assert_eq!(decode_body(body).unwrap(), parts);
    }

    #[test]
    fn too_many_parts_rejected_on_encode() {
        let parts = vec![Bytes::new(); MAX_PARTS as usize + 1];
        assert!(encode_frame(&parts).is_err());
    }
}
