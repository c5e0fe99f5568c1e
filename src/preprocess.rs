//! Preprocessing: stream the padded database once and build a fresh round.

use crate::hints::{pick_extra_index, xor_bytes_inplace, BackupHint, HintSeed, PrimaryHint};
use crate::messages::{ClientError, ConfigError};
use crate::online::{Exchange, Request};
use crate::online_client::expect_chunks;
use crate::online_framing::MAX_FRAME_SIZE;
use crate::params::Params;
use crate::prf::Prf;
use rand::Rng;
use rayon::prelude::*;
use std::collections::{HashMap, VecDeque};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOrigin {
    /// No primary hint covered the index at preprocessing time.
    Discovered,
    /// Resolved by an actual query this round.
    Queried,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: Vec<u8>,
    pub origin: CacheOrigin,
}

/// All hint state for one round. Discarded wholesale on the next preprocessing.
#[derive(Debug)]
pub struct RoundState {
    pub prf: Prf,
    pub primaries: Vec<PrimaryHint>,
    pub backups: VecDeque<BackupHint>,
    pub cache: HashMap<u64, CacheEntry>,
    pub query_num: u64,
    pub dummy_counter: u32,
}

impl RoundState {
    pub fn cached_value(&self, index: u64) -> Option<&[u8]> {
        self.cache.get(&index).map(|e| e.value.as_slice())
    }

    pub fn count_discovered(&self) -> usize {
        self.cache
            .values()
            .filter(|e| e.origin == CacheOrigin::Discovered)
            .count()
    }
}

/// One streamed batch of consecutive chunks.
struct ChunkBatch<'a> {
    params: &'a Params,
    first_chunk: u64,
    num_chunks: u64,
    data: &'a [u8],
}

impl ChunkBatch<'_> {
    fn span(&self) -> usize {
        (self.num_chunks * self.params.chunk_size) as usize
    }

    fn first_index(&self) -> u64 {
        self.params.index_of(self.first_chunk, 0)
    }

    /// Entry at a global (padded) index inside this batch.
    fn entry(&self, index: u64) -> &[u8] {
        let local = (index - self.first_index()) as usize;
        let size = self.params.entry_size;
        &self.data[local * size..(local + 1) * size]
    }
}

/// Bytes reserved in a stream frame for the encoded `Reply` around the chunk data.
const STREAM_REPLY_OVERHEAD: usize = 64;

/// Largest number of chunks one `Stream` reply can carry within a frame.
pub fn max_batch_chunks(params: &Params) -> Result<u64, ConfigError> {
    let chunk_bytes = (params.chunk_size as usize)
        .checked_mul(params.entry_size)
        .ok_or(ConfigError::Overflow)?;
    let fit = (MAX_FRAME_SIZE - STREAM_REPLY_OVERHEAD) / chunk_bytes;
    if fit == 0 {
        return Err(ConfigError::InvalidGeometry("a single chunk exceeds the frame size limit"));
    }
    Ok(fit as u64)
}

/// Run a full preprocessing pass against `exchange`.
pub fn preprocess<E, R>(
    params: &Params,
    batch_chunks: u64,
    rng: &mut R,
    exchange: &mut E,
) -> Result<RoundState, ClientError>
where
    E: Exchange + ?Sized,
    R: Rng + ?Sized,
{
    params.validate()?;
    let batch_chunks = batch_chunks.clamp(1, params.chunk_num).min(max_batch_chunks(params)?);
    let prf = Prf::from_rng(rng);
    let num_chunks = params.chunk_num as u32;
    let num_primary = params.num_primary_hints as usize;
    let total = params.total_hints() as u32;

    let seeds: Vec<HintSeed> = (0..total)
        .into_par_iter()
        .map(|id| HintSeed::derive(&prf, id, num_chunks))
        .collect();

    let mut primaries: Vec<PrimaryHint> = seeds[..num_primary]
        .iter()
        .map(|&seed| {
            let extra = pick_extra_index(&prf, params, seed, rng);
            PrimaryHint::direct(seed, extra, params.entry_size)
        })
        .collect();
    let mut backups: Vec<BackupHint> = seeds[num_primary..]
        .iter()
        .map(|&seed| BackupHint::new(seed, params.entry_size))
        .collect();

    let mut cache = HashMap::new();
    let mut first_chunk = 0;
    while first_chunk < params.chunk_num {
        let count = batch_chunks.min(params.chunk_num - first_chunk);
        let reply = exchange.exchange(Request::Stream { first_chunk, num_chunks: count })?;
        let data = expect_chunks(reply, params, first_chunk, count)?;
        let batch = ChunkBatch { params, first_chunk, num_chunks: count, data: &data };

        let hit = fold_primaries(&prf, &mut primaries, &batch);
        fold_backups(&prf, &mut backups, &batch);

        let base = batch.first_index();
        for (local, covered) in hit.iter().enumerate() {
            let index = base + local as u64;
            if !covered && index < params.num_entries {
                cache.insert(
                    index,
                    CacheEntry { value: batch.entry(index).to_vec(), origin: CacheOrigin::Discovered },
                );
            }
        }
        first_chunk += count;
    }

    let invalid = seeds.iter().filter(|s| !s.is_valid()).count();
    if invalid > 0 {
        log::debug!("preprocess: {} hint seeds hit a median collision", invalid);
    }
    log::debug!(
        "preprocess: {} primaries, {} backups, {} uncovered entries cached",
        primaries.len(),
        backups.len(),
        cache.len()
    );

    Ok(RoundState {
        prf,
        primaries,
        backups: backups.into(),
        cache,
        query_num: 0,
        dummy_counter: 0,
    })
}

/// Fold the batch into every primary and return the per-index hit map.
fn fold_primaries(prf: &Prf, primaries: &mut [PrimaryHint], batch: &ChunkBatch<'_>) -> Vec<bool> {
    let params = batch.params;
    let span = batch.span();
    let base = batch.first_index();

    primaries
        .par_iter_mut()
        .fold(
            || (vec![false; span], Vec::new(), Vec::new()),
            |(mut hit, mut selects, mut offsets), hint| {
                if !hint.seed.is_valid() {
                    return (hit, selects, offsets);
                }
                prf.fill_block(
                    hint.seed.id,
                    batch.first_chunk as u32,
                    batch.num_chunks as u32,
                    &mut selects,
                    &mut offsets,
                );
                let extra_chunk = params.chunk_of(hint.extra_index);
                for i in 0..batch.num_chunks as usize {
                    let chunk = batch.first_chunk + i as u64;
                    let index = if (selects[i] < hint.seed.cutoff) != hint.flipped {
                        params.index_of(chunk, offsets[i] % params.chunk_size)
                    } else if chunk == extra_chunk {
                        hint.extra_index
                    } else {
                        continue;
                    };
                    xor_bytes_inplace(&mut hint.parity, batch.entry(index));
                    hit[(index - base) as usize] = true;
                }
                (hit, selects, offsets)
            },
        )
        .map(|(hit, _, _)| hit)
        .reduce(
            || vec![false; span],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b) {
                    *x |= y;
                }
                a
            },
        )
}

fn fold_backups(prf: &Prf, backups: &mut [BackupHint], batch: &ChunkBatch<'_>) {
    let params = batch.params;
    backups.par_iter_mut().for_each_init(
        || (Vec::new(), Vec::new()),
        |(selects, offsets), backup| {
            if !backup.seed.is_valid() {
                return;
            }
            prf.fill_block(
                backup.seed.id,
                batch.first_chunk as u32,
                batch.num_chunks as u32,
                selects,
                offsets,
            );
            for i in 0..batch.num_chunks as usize {
                let chunk = batch.first_chunk + i as u64;
                let index = params.index_of(chunk, offsets[i] % params.chunk_size);
                backup.fold(selects[i] < backup.seed.cutoff, batch.entry(index));
            }
        },
    );
}
