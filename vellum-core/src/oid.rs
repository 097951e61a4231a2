// src/oid.rs
// 12-byte object identifiers: 4 bytes unix seconds, 5 bytes per-process
// random, 3 bytes counter. Rendered as 24 lowercase hex characters.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::VellumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid([u8; 12]);

static PROCESS_RANDOM: OnceLock<[u8; 5]> = OnceLock::new();
static COUNTER: OnceLock<AtomicU32> = OnceLock::new();

fn process_random() -> &'static [u8; 5] {
    PROCESS_RANDOM.get_or_init(|| {
        let mut bytes = [0u8; 5];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    })
}

fn counter() -> &'static AtomicU32 {
    COUNTER.get_or_init(|| AtomicU32::new(rand::thread_rng().next_u32()))
}

impl Oid {
    /// Generate a fresh identifier. Identifiers from the same process are
    /// strictly increasing within one second.
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        let count = counter().fetch_add(1, Ordering::SeqCst);

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(process_random());
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        Oid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Oid(bytes)
    }

    /// Seconds-since-epoch embedded in the identifier.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(24);
        for b in &self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

impl Default for Oid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Oid {
    type Err = VellumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 24 {
            return Err(VellumError::Validation(format!(
                "Invalid OID '{}': expected 24 hex characters",
                s
            )));
        }
        let mut bytes = [0u8; 12];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk)
                .map_err(|_| VellumError::Validation(format!("Invalid OID '{}'", s)))?;
            bytes[i] = u8::from_str_radix(hex, 16)
                .map_err(|_| VellumError::Validation(format!("Invalid OID '{}'", s)))?;
        }
        Ok(Oid(bytes))
    }
}

impl Serialize for Oid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_hex_roundtrip() {
        let oid = Oid::new();
        let hex = oid.to_hex();
        assert_eq!(hex.len(), 24);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let parsed: Oid = hex.parse().unwrap();
        assert_eq!(parsed, oid);
    }

    #[test]
    fn test_oid_monotonic_within_process() {
        let a = Oid::new();
        let b = Oid::new();
        assert!(b > a, "consecutive OIDs should increase");
    }

    #[test]
    fn test_oid_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(Oid::new()));
        }
    }

    #[test]
    fn test_oid_parse_rejects_bad_input() {
        assert!("tooshort".parse::<Oid>().is_err());
        assert!("zz".repeat(12).parse::<Oid>().is_err());
        assert!("0".repeat(25).parse::<Oid>().is_err());
    }

    #[test]
    fn test_oid_timestamp_is_recent() {
        let oid = Oid::new();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as u32;
        assert!(now - oid.timestamp() < 5);
    }
}
