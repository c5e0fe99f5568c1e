//! Folding server-side changes into client hints and cache.

use crate::hints::xor_bytes_inplace;
use crate::messages::{ClientError, EntryUpdate};
use crate::params::Params;
use crate::preprocess::RoundState;

/// What an update touched on the client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub primaries: usize,
    pub backups: usize,
    pub cached: bool,
}

/// Apply `delta = old ^ new` at `update.index` to every dependent hint and
/// the cache.
///
/// A programmed hint still waiting for the value at `update.index` is left
/// alone: its amendment reads the cache, which receives the delta here.
pub fn apply_update(
    params: &Params,
    round: &mut RoundState,
    update: &EntryUpdate,
) -> Result<UpdateReport, ClientError> {
    if update.index >= params.num_entries {
        return Err(ClientError::InvalidIndex {
            index: update.index,
            num_entries: params.num_entries,
        });
    }
    if update.delta.len() != params.entry_size {
        return Err(ClientError::EntrySizeMismatch {
            expected: params.entry_size,
            got: update.delta.len(),
        });
    }

    let mut report = UpdateReport::default();
    let chunk = params.chunk_of(update.index);
    let offset = params.offset_in_chunk(update.index);
    let prf = &round.prf;

    for hint in round.primaries.iter_mut() {
        if hint.amend_index() == Some(update.index) {
            continue;
        }
        if hint.covers(prf, params, update.index) {
            xor_bytes_inplace(&mut hint.parity, &update.delta);
            report.primaries += 1;
        }
    }

    for backup in round.backups.iter_mut() {
        if !backup.seed.is_valid() {
            continue;
        }
        let (select, raw_offset) = prf.expand(backup.seed.id, chunk as u32);
        if raw_offset % params.chunk_size != offset {
            continue;
        }
        backup.fold(select < backup.seed.cutoff, &update.delta);
        report.backups += 1;
    }

    if let Some(entry) = round.cache.get_mut(&update.index) {
        xor_bytes_inplace(&mut entry.value, &update.delta);
        report.cached = true;
    }

    Ok(report)
}
