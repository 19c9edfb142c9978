//! Random short identifier generation.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::{IdGenerator, ShortId};

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Length of generated identifiers.
pub const DEFAULT_LEN: usize = 8;

pub(crate) fn is_alphabet_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Generator drawing from the operating system CSPRNG.
///
/// The alphabet has exactly 64 symbols, so masking each random byte to its low
/// six bits picks every symbol with equal probability.
#[derive(Clone, Copy, Debug)]
pub struct RandomIdGenerator {
    len: usize,
}

impl RandomIdGenerator {
    pub fn new(len: usize) -> Self {
        Self {
            len: len.clamp(1, ShortId::MAX_LEN),
        }
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_LEN)
    }
}

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> ShortId {
        let mut bytes = vec![0u8; self.len];
        OsRng.fill_bytes(&mut bytes);
        let s: String = bytes
            .into_iter()
            .map(|b| ALPHABET[(b & 0x3f) as usize] as char)
            .collect();
        // Valid by construction: alphabet-only and within MAX_LEN
        ShortId(s)
    }
}
