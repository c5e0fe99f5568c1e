//! Primary and backup hints.
//!
//! A hint seed selects, for every chunk, one pseudorandom offset and one
//! side bit. The median cutoff splits the chunks into two halves of exactly
//! `chunk_num / 2`. A primary hint covers one half (its main set) plus a
//! single extra index in a chunk of the other half. A backup hint keeps the
//! parities of both halves until it is programmed into a primary slot.

use crate::params::Params;
use crate::prf::Prf;
use rand::Rng;

/// PRF identity of a hint plus its median cutoff. A cutoff of 0 marks a
/// median collision; such a seed covers nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HintSeed {
    pub id: u32,
    pub cutoff: u32,
}

impl HintSeed {
    pub fn derive(prf: &Prf, id: u32, num_chunks: u32) -> Self {
        let cutoff = find_median_cutoff(&prf.select_vector(id, num_chunks));
        Self { id, cutoff }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.cutoff != 0
    }

    /// Side bit at `chunk`: true for the left (below-median) half.
    #[inline]
    pub fn covers_chunk(&self, prf: &Prf, chunk: u64) -> bool {
        self.is_valid() && prf.select(self.id, chunk as u32) < self.cutoff
    }

    /// The one offset this seed selects inside `chunk`.
    #[inline]
    pub fn offset_in_chunk(&self, prf: &Prf, params: &Params, chunk: u64) -> u64 {
        prf.offset(self.id, chunk as u32) % params.chunk_size
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HintKind {
    /// Built by preprocessing.
    Direct,
    /// Spliced from a backup hint during a query. While `amend_index` is set
    /// the parity still lacks the value at that index.
    Programmed { amend_index: Option<u64> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrimaryHint {
    pub seed: HintSeed,
    /// Main set is the right half instead of the left one.
    pub flipped: bool,
    /// Always in a chunk outside the main set.
    pub extra_index: u64,
    pub parity: Vec<u8>,
    pub kind: HintKind,
}

impl PrimaryHint {
    pub fn direct(seed: HintSeed, extra_index: u64, entry_size: usize) -> Self {
        Self {
            seed,
            flipped: false,
            extra_index,
            parity: vec![0u8; entry_size],
            kind: HintKind::Direct,
        }
    }

    /// Splice `index` into a backup hint.
    ///
    /// The new main set is the backup half that excludes `chunk(index)`, and
    /// `index` becomes the extra. Without `value` the parity is left pending
    /// with `amend_index = index`.
    pub fn program(
        backup: &BackupHint,
        prf: &Prf,
        params: &Params,
        index: u64,
        value: Option<&[u8]>,
    ) -> Self {
        let chunk = params.chunk_of(index);
        let (flipped, mut parity) = if backup.seed.covers_chunk(prf, chunk) {
            (true, backup.right_parity.clone())
        } else {
            (false, backup.left_parity.clone())
        };
        let amend_index = match value {
            Some(v) => {
                xor_bytes_inplace(&mut parity, v);
                None
            }
            None => Some(index),
        };
        Self {
            seed: backup.seed,
            flipped,
            extra_index: index,
            parity,
            kind: HintKind::Programmed { amend_index },
        }
    }

    #[inline]
    pub fn in_main_set(&self, prf: &Prf, chunk: u64) -> bool {
        self.seed.is_valid() && self.seed.covers_chunk(prf, chunk) != self.flipped
    }

    /// Whether `index` is in the covered set.
    pub fn covers(&self, prf: &Prf, params: &Params, index: u64) -> bool {
        if !self.seed.is_valid() {
            return false;
        }
        if index == self.extra_index {
            return true;
        }
        let chunk = params.chunk_of(index);
        let (select, offset) = prf.expand(self.seed.id, chunk as u32);
        (select < self.seed.cutoff) != self.flipped
            && offset % params.chunk_size == params.offset_in_chunk(index)
    }

    /// Selected index in `chunk`, or None when the chunk contributes nothing.
    pub fn index_in_chunk(&self, prf: &Prf, params: &Params, chunk: u64) -> Option<u64> {
        if !self.seed.is_valid() {
            return None;
        }
        if self.in_main_set(prf, chunk) {
            Some(params.index_of(chunk, self.seed.offset_in_chunk(prf, params, chunk)))
        } else if params.chunk_of(self.extra_index) == chunk {
            Some(self.extra_index)
        } else {
            None
        }
    }

    /// Every index folded into the parity, in chunk order.
    pub fn covered_indices(&self, prf: &Prf, params: &Params) -> Vec<u64> {
        (0..params.chunk_num)
            .filter_map(|chunk| self.index_in_chunk(prf, params, chunk))
            .collect()
    }

    pub fn amend_index(&self) -> Option<u64> {
        match self.kind {
            HintKind::Programmed { amend_index } => amend_index,
            HintKind::Direct => None,
        }
    }

    /// Complete a pending amendment with the now-known value.
    pub fn amend(&mut self, value: &[u8]) {
        if let HintKind::Programmed { amend_index } = &mut self.kind {
            if amend_index.take().is_some() {
                xor_bytes_inplace(&mut self.parity, value);
            }
        }
    }

    pub fn is_programmed(&self) -> bool {
        matches!(self.kind, HintKind::Programmed { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupHint {
    pub seed: HintSeed,
    pub left_parity: Vec<u8>,
    pub right_parity: Vec<u8>,
}

impl BackupHint {
    pub fn new(seed: HintSeed, entry_size: usize) -> Self {
        Self {
            seed,
            left_parity: vec![0u8; entry_size],
            right_parity: vec![0u8; entry_size],
        }
    }

    /// Fold the entry this backup selects in `chunk` into the matching side.
    pub fn fold(&mut self, left: bool, entry: &[u8]) {
        if left {
            xor_bytes_inplace(&mut self.left_parity, entry);
        } else {
            xor_bytes_inplace(&mut self.right_parity, entry);
        }
    }
}

/// Pick a uniformly random extra index in a chunk outside the seed's left half.
pub fn pick_extra_index<R: Rng + ?Sized>(
    prf: &Prf,
    params: &Params,
    seed: HintSeed,
    rng: &mut R,
) -> u64 {
    if !seed.is_valid() {
        return u64::MAX;
    }
    // Exactly half of the chunks qualify, so this terminates quickly.
    loop {
        let chunk = rng.gen_range(0..params.chunk_num);
        if !seed.covers_chunk(prf, chunk) {
            return params.index_of(chunk, rng.gen_range(0..params.chunk_size));
        }
    }
}

/// XOR two byte slices in place: a ^= b
pub fn xor_bytes_inplace(a: &mut [u8], b: &[u8]) {
    debug_assert_eq!(a.len(), b.len());
    for (x, y) in a.iter_mut().zip(b.iter()) {
        *x ^= *y;
    }
}

/// Find median cutoff value.
///
/// Returns cutoff such that exactly len/2 elements are smaller,
/// or 0 if the two middle values collide.
pub fn find_median_cutoff(values: &[u32]) -> u32 {
    debug_assert!(values.len() % 2 == 0, "Length must be even");
    if values.len() < 2 {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted[mid - 1] == sorted[mid] {
        return 0;
    }
    sorted[mid]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn setup() -> (Params, Prf, ChaCha20Rng) {
        let params = Params::new(64, 4, 4).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let prf = Prf::from_rng(&mut rng);
        (params, prf, rng)
    }

    #[test]
    fn test_find_median_cutoff() {
        let values = vec![10, 30, 20, 40];
        assert_eq!(find_median_cutoff(&values), 30);
    }

    #[test]
    fn test_median_cutoff_collision() {
        let values = vec![10, 20, 20, 40];
        assert_eq!(find_median_cutoff(&values), 0);
    }

    #[test]
    fn test_xor_bytes() {
        let mut a = vec![0xFFu8, 0x00, 0xAA];
        let b = vec![0x0F, 0xF0, 0x55];
        xor_bytes_inplace(&mut a, &b);
        assert_eq!(a, vec![0xF0, 0xF0, 0xFF]);
    }

    #[test]
    fn test_seed_splits_chunks_in_half() {
        let (params, prf, _) = setup();
        for id in 0..50 {
            let seed = HintSeed::derive(&prf, id, params.chunk_num as u32);
            assert!(seed.is_valid());
            let left = (0..params.chunk_num)
                .filter(|&c| seed.covers_chunk(&prf, c))
                .count() as u64;
            assert_eq!(left, params.chunk_num / 2);
        }
    }

    #[test]
    fn test_one_offset_per_chunk() {
        let (params, prf, _) = setup();
        let seed = HintSeed::derive(&prf, 3, params.chunk_num as u32);
        let offsets: Vec<u64> = (0..params.chunk_num)
            .map(|c| seed.offset_in_chunk(&prf, &params, c))
            .collect();
        assert_eq!(offsets.len() as u64, params.chunk_num);
        assert!(offsets.iter().all(|&o| o < params.chunk_size));
    }

    #[test]
    fn test_direct_hint_covered_set() {
        let (params, prf, mut rng) = setup();
        let seed = HintSeed::derive(&prf, 7, params.chunk_num as u32);
        let extra = pick_extra_index(&prf, &params, seed, &mut rng);
        let hint = PrimaryHint::direct(seed, extra, params.entry_size);
        assert!(!hint.in_main_set(&prf, params.chunk_of(extra)));

        let covered = hint.covered_indices(&prf, &params);
        assert_eq!(covered.len() as u64, params.chunk_num / 2 + 1);
        for idx in &covered {
            assert!(hint.covers(&prf, &params, *idx));
        }
        let chunks: std::collections::HashSet<u64> =
            covered.iter().map(|&i| params.chunk_of(i)).collect();
        assert_eq!(chunks.len(), covered.len());
    }

    #[test]
    fn test_program_excludes_target_chunk() {
        let (params, prf, _) = setup();
        let seed = HintSeed::derive(&prf, 100, params.chunk_num as u32);
        let mut backup = BackupHint::new(seed, 4);
        backup.left_parity = vec![1, 1, 1, 1];
        backup.right_parity = vec![2, 2, 2, 2];

        for index in [0u64, 9, 33, 63] {
            let value = [0x10u8, 0x20, 0x30, 0x40];
            let hint = PrimaryHint::program(&backup, &prf, &params, index, Some(&value));
            assert!(!hint.in_main_set(&prf, params.chunk_of(index)));
            assert!(hint.covers(&prf, &params, index));
            assert_eq!(hint.amend_index(), None);
            let side = if hint.flipped { 2u8 } else { 1u8 };
            assert_eq!(hint.parity, vec![side ^ 0x10, side ^ 0x20, side ^ 0x30, side ^ 0x40]);
            assert_eq!(hint.covered_indices(&prf, &params).len() as u64, params.chunk_num / 2 + 1);
        }
    }

    #[test]
    fn test_pending_amendment() {
        let (params, prf, _) = setup();
        let seed = HintSeed::derive(&prf, 101, params.chunk_num as u32);
        let backup = BackupHint::new(seed, 2);
        let mut hint = PrimaryHint::program(&backup, &prf, &params, 12, None);
        assert_eq!(hint.amend_index(), Some(12));
        hint.amend(&[0xAA, 0x55]);
        assert_eq!(hint.amend_index(), None);
        assert_eq!(hint.parity, vec![0xAA, 0x55]);
        // A second amend is a no-op.
        hint.amend(&[0xFF, 0xFF]);
        assert_eq!(hint.parity, vec![0xAA, 0x55]);
    }

    #[test]
    fn test_invalid_seed_covers_nothing() {
        let (params, prf, _) = setup();
        let seed = HintSeed { id: 1, cutoff: 0 };
        let hint = PrimaryHint::direct(seed, u64::MAX, 4);
        assert!(!hint.covers(&prf, &params, 0));
        assert!(hint.covered_indices(&prf, &params).is_empty());
    }
}
