// Digest backends for the hash engine.
//
// One backend is chosen when a `HashEngine` is built and never changes per
// call. All backends emit 256 bits as 64 lowercase hex characters.
//
// - `Sha256`: primary, SHA-256 via the `sha2` crate
// - `Blake3`: secondary cryptographic backend
// - `FnvInsecure`: four-lane FNV-1a, deterministic but NOT cryptographic.
//   Exists so degraded/test environments stay functional; production configs
//   reject it (see `HashEngine::from_config`).

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
/// Per-lane seed spread (golden ratio constant).
const FNV_LANE_SPREAD: u64 = 0x9e37_79b9_7f4a_7c15;
const FNV_LANES: u64 = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DigestBackend {
    #[default]
    Sha256,
    Blake3,
    FnvInsecure,
}

impl DigestBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
            Self::FnvInsecure => "fnv_insecure",
        }
    }

    pub fn is_cryptographic(self) -> bool {
        !matches!(self, Self::FnvInsecure)
    }

    /// Digest `data`, returned as a lowercase hex string of 64 characters.
    pub fn digest_hex(self, data: &[u8]) -> String {
        match self {
            Self::Sha256 => hex_encode(&Sha256::digest(data)),
            Self::Blake3 => hex_encode(blake3::hash(data).as_bytes()),
            Self::FnvInsecure => hex_encode(&fnv_256(data)),
        }
    }
}

impl fmt::Display for DigestBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn fnv_256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for lane in 0..FNV_LANES {
        let mut state = FNV_OFFSET_BASIS ^ FNV_LANE_SPREAD.wrapping_mul(lane + 1);
        for &byte in data {
            state ^= u64::from(byte);
            state = state.wrapping_mul(FNV_PRIME);
        }
        // Fold the length in so zero-padded inputs diverge.
        state ^= data.len() as u64;
        state = state.wrapping_mul(FNV_PRIME);

        let start = (lane as usize) * 8;
        out[start..start + 8].copy_from_slice(&state.to_be_bytes());
    }
    out
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}
