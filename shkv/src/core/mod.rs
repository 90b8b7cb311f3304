use std::fmt;

use serde_derive::{Deserialize, Serialize};

/// Width of every key and value moved across the shared segment.
pub const FIXED_STR_LEN: usize = 16;

pub static SEGMENT_FILE_NAME: &str = "shkv-transport";

/// Fixed-width, zero-padded byte string. Keys and values are copied by
/// content across the process boundary, so the layout must stay flat:
/// no heap pointers, `memcpy`-safe, identical in every mapping.
///
/// Input longer than [`FIXED_STR_LEN`] is silently truncated; shorter
/// input is zero-padded. Equality and hashing cover all bytes including
/// the padding, so two values with identical padded bytes are the same key.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedStr {
    bytes: [u8; FIXED_STR_LEN],
}

impl FixedStr {
    pub fn new(src: &[u8]) -> FixedStr {
        let mut bytes = [0u8; FIXED_STR_LEN];
        let n = src.len().min(FIXED_STR_LEN);
        bytes[..n].copy_from_slice(&src[..n]);
        FixedStr { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; FIXED_STR_LEN] {
        &self.bytes
    }

    /// FNV-1a over all `FIXED_STR_LEN` bytes, trailing padding included.
    pub fn hash64(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for &b in &self.bytes {
            h ^= u64::from(b);
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        h
    }

    fn trimmed(&self) -> &[u8] {
        let end = self
            .bytes
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |p| p + 1);
        &self.bytes[..end]
    }
}

impl From<&str> for FixedStr {
    fn from(s: &str) -> FixedStr {
        FixedStr::new(s.as_bytes())
    }
}

impl fmt::Display for FixedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.trimmed()))
    }
}

impl fmt::Debug for FixedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.trimmed()))
    }
}

/// Operation carried by a [`Request`].
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Op {
    Read = 0,
    Insert = 1,
    Remove = 2,
}

/// Outcome carried by a [`Response`].
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    Acknowledged = 0,
    ReadSucceeded = 1,
    ReadFailed = 2,
}

/// One client request. Produced by a client, consumed exactly once by one
/// server worker. `value` is meaningful only for `Op::Insert`; `wants_reply`
/// is implied for reads.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Request {
    pub client_id: u32,
    pub op: Op,
    pub wants_reply: bool,
    pub key: FixedStr,
    pub value: FixedStr,
}

/// One server answer, addressed to the client whose id matches.
/// `value` is meaningful only for `Status::ReadSucceeded`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Response {
    pub client_id: u32,
    pub status: Status,
    pub value: FixedStr,
}

/// Location and sizing of the shared transport segment. Server and clients
/// must load the same values; the ring capacity decides the segment size.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShmemConfig {
    pub data_dir: String,
    pub segment_name: String,
    pub ring_capacity: usize,
}

impl Default for ShmemConfig {
    fn default() -> ShmemConfig {
        ShmemConfig {
            data_dir: "/dev/shm".to_string(),
            segment_name: SEGMENT_FILE_NAME.to_string(),
            ring_capacity: 64,
        }
    }
}

impl ShmemConfig {
    pub fn flink_path(&self) -> String {
        format!("{}/{}", self.data_dir, self.segment_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_is_zero_padded() {
        let s = FixedStr::from("abc");
        assert_eq!(&s.as_bytes()[..3], b"abc");
        assert!(s.as_bytes()[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn overlong_input_is_truncated() {
        let s = FixedStr::from("0123456789abcdefOVERFLOW");
        assert_eq!(s.as_bytes(), b"0123456789abcdef");
        assert_eq!(s, FixedStr::from("0123456789abcdef"));
    }

    #[test]
    fn padded_equals_hash_and_compare_alike() {
        let a = FixedStr::new(b"key\0\0");
        let b = FixedStr::new(b"key");
        assert_eq!(a, b);
        assert_eq!(a.hash64(), b.hash64());
    }

    #[test]
    fn distinct_keys_hash_apart() {
        // Not a guarantee of the hash, just a sanity check on the mixing.
        assert_ne!(
            FixedStr::from("alpha").hash64(),
            FixedStr::from("beta").hash64()
        );
    }

    #[test]
    fn display_drops_trailing_padding() {
        assert_eq!(FixedStr::from("carrot").to_string(), "carrot");
        assert_eq!(FixedStr::default().to_string(), "");
    }
}
