//! Keyed membership expansion.
//!
//! Every (hint id, chunk) pair maps to a 32-bit selection value and a 64-bit
//! offset. Hints store only their id; per-chunk membership is recomputed.

use rand::RngCore;
use sha3::{Digest, Sha3_256};
use std::fmt;

const EXPAND_LABEL: &[u8] = b"cppir/membership/v1";

/// PRF keyed once per preprocessing round.
#[derive(Clone)]
pub struct Prf {
    keyed: Sha3_256,
}

impl Prf {
    pub fn new(key: [u8; 32]) -> Self {
        let mut keyed = Sha3_256::new();
        keyed.update(EXPAND_LABEL);
        keyed.update(key);
        Self { keyed }
    }

    pub fn from_rng<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        Self::new(key)
    }

    /// Selection value and raw offset for `hint_id` at `chunk`.
    #[inline]
    pub fn expand(&self, hint_id: u32, chunk: u32) -> (u32, u64) {
        let mut hasher = self.keyed.clone();
        hasher.update(hint_id.to_le_bytes());
        hasher.update(chunk.to_le_bytes());
        let out = hasher.finalize();

        let mut select = [0u8; 4];
        select.copy_from_slice(&out[..4]);
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&out[4..12]);
        (u32::from_le_bytes(select), u64::from_le_bytes(offset))
    }

    #[inline]
    pub fn select(&self, hint_id: u32, chunk: u32) -> u32 {
        self.expand(hint_id, chunk).0
    }

    #[inline]
    pub fn offset(&self, hint_id: u32, chunk: u32) -> u64 {
        self.expand(hint_id, chunk).1
    }

    /// Selection values for chunks `0..num_chunks`.
    pub fn select_vector(&self, hint_id: u32, num_chunks: u32) -> Vec<u32> {
        (0..num_chunks).map(|c| self.select(hint_id, c)).collect()
    }

    /// Expand a contiguous block of chunks into reusable buffers.
    pub fn fill_block(
        &self,
        hint_id: u32,
        first_chunk: u32,
        count: u32,
        selects: &mut Vec<u32>,
        offsets: &mut Vec<u64>,
    ) {
        selects.clear();
        offsets.clear();
        for chunk in first_chunk..first_chunk + count {
            let (select, offset) = self.expand(hint_id, chunk);
            selects.push(select);
            offsets.push(offset);
        }
    }
}

impl fmt::Debug for Prf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prf").finish_non_exhaustive()
    }
}
