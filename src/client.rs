//! Client session: online queries, cache-hit hiding, budget tracking.

use crate::config::{CacheHitPolicy, ClientConfig};
use crate::hints::{pick_extra_index, xor_bytes_inplace, HintSeed, PrimaryHint};
use crate::messages::{bitmask_len, set_bit, ClientError, EntryUpdate, ProtocolAbort, PuncturedQuery};
use crate::online::{Exchange, Request};
use crate::online_client::{expect_empty, expect_parities};
use crate::params::{Params, DUMMY_ID_FLOOR};
use crate::preprocess::{preprocess, CacheEntry, CacheOrigin, RoundState};
use crate::prf::Prf;
use crate::updates::{self, UpdateReport};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::HashSet;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub actual_queries: u64,
    /// Hits on entries resolved by an earlier actual query.
    pub cache_hits: u64,
    /// Hits on entries no hint covered at preprocessing.
    pub discovered_hits: u64,
    pub rounds_completed: u64,
    pub updates_applied: u64,
}

struct PreparedQuery {
    index: u64,
    flip: bool,
    query: PuncturedQuery,
    parity: Vec<u8>,
    amend_index: Option<u64>,
}

enum Planned {
    Hit { index: u64, request: Request },
    Actual(PreparedQuery),
}

pub struct Client {
    params: Params,
    config: ClientConfig,
    rng: ChaCha20Rng,
    round: RoundState,
    stats: SessionStats,
    poisoned: bool,
}

impl Client {
    /// Validate `params` and run the first preprocessing round.
    pub fn init<E: Exchange + ?Sized>(
        params: Params,
        config: ClientConfig,
        exchange: &mut E,
    ) -> Result<Self, ClientError> {
        params.validate()?;
        let mut rng = match config.rng_seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        let round = preprocess(&params, config.preprocess_batch_chunks, &mut rng, exchange)?;
        log::info!(
            "session ready: n={} chunks={}x{} primaries={} backups={} budget={}",
            params.num_entries,
            params.chunk_num,
            params.chunk_size,
            params.num_primary_hints,
            params.num_backup_hints,
            params.query_budget
        );
        Ok(Self {
            params,
            config,
            rng,
            round,
            stats: SessionStats::default(),
            poisoned: false,
        })
    }

    pub fn get<E: Exchange + ?Sized>(&mut self, exchange: &mut E, index: u64) -> Result<Vec<u8>, ClientError> {
        let mut values = self.get_batch(exchange, &[index])?;
        values
            .pop()
            .ok_or_else(|| ProtocolAbort::MalformedPayload("empty batch result".into()).into())
    }

    /// Retrieve several entries. Values come back in request order.
    ///
    /// The batch is cut into segments that never exceed the remaining round
    /// budget; a new round is preprocessed between segments when needed.
    pub fn get_batch<E: Exchange + ?Sized>(
        &mut self,
        exchange: &mut E,
        indices: &[u64],
    ) -> Result<Vec<Vec<u8>>, ClientError> {
        self.ensure_live()?;
        for &index in indices {
            self.check_index(index)?;
        }

        let mut values = Vec::with_capacity(indices.len());
        let mut rest = indices;
        while !rest.is_empty() {
            let result = self.run_segment(exchange, rest);
            let (segment, taken) = self.poison_on_err(result)?;
            if taken == 0 {
                let err = ProtocolAbort::MalformedPayload("query segment made no progress".into());
                return self.poison_on_err(Err(err.into()));
            }
            values.extend(segment);
            rest = &rest[taken..];
        }
        Ok(values)
    }

    /// Fold a server update notification into hints and cache.
    pub fn apply_update(&mut self, update: &EntryUpdate) -> Result<UpdateReport, ClientError> {
        self.ensure_live()?;
        let report = updates::apply_update(&self.params, &mut self.round, update)?;
        self.stats.updates_applied += 1;
        log::debug!(
            "update index={} primaries={} backups={} cached={}",
            update.index,
            report.primaries,
            report.backups,
            report.cached
        );
        Ok(report)
    }

    /// Discard the current round and preprocess a new one.
    pub fn refresh<E: Exchange + ?Sized>(&mut self, exchange: &mut E) -> Result<(), ClientError> {
        self.ensure_live()?;
        let result = self.start_round(exchange);
        self.poison_on_err(result)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn rounds_completed(&self) -> u64 {
        self.stats.rounds_completed
    }

    pub fn query_num(&self) -> u64 {
        self.round.query_num
    }

    pub fn remaining_queries(&self) -> u64 {
        self.params.query_budget - self.round.query_num
    }

    pub fn backups_remaining(&self) -> usize {
        self.round.backups.len()
    }

    pub fn num_cached(&self) -> usize {
        self.round.cache.len()
    }

    pub fn is_cached(&self, index: u64) -> bool {
        self.round.cache.contains_key(&index)
    }

    pub fn cache_origin(&self, index: u64) -> Option<CacheOrigin> {
        self.round.cache.get(&index).map(|e| e.origin)
    }

    pub fn primary_hints(&self) -> &[PrimaryHint] {
        &self.round.primaries
    }

    pub fn round_prf(&self) -> &Prf {
        &self.round.prf
    }

    /// Slots whose covered set contains `index`.
    pub fn covering_slots(&self, index: u64) -> Vec<usize> {
        self.round
            .primaries
            .iter()
            .enumerate()
            .filter(|(_, h)| h.covers(&self.round.prf, &self.params, index))
            .map(|(slot, _)| slot)
            .collect()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn ensure_live(&self) -> Result<(), ClientError> {
        if self.poisoned {
            return Err(ClientError::Poisoned);
        }
        Ok(())
    }

    fn check_index(&self, index: u64) -> Result<(), ClientError> {
        if index >= self.params.num_entries {
            return Err(ClientError::InvalidIndex {
                index,
                num_entries: self.params.num_entries,
            });
        }
        Ok(())
    }

    fn poison_on_err<T>(&mut self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if let Err(err) = &result {
            log::warn!("session aborted: {}", err);
            self.poisoned = true;
        }
        result
    }

    fn start_round<E: Exchange + ?Sized>(&mut self, exchange: &mut E) -> Result<(), ClientError> {
        self.round = preprocess(&self.params, self.config.preprocess_batch_chunks, &mut self.rng, exchange)?;
        self.stats.rounds_completed += 1;
        log::info!(
            "round {} preprocessed, {} uncovered entries cached",
            self.stats.rounds_completed,
            self.round.count_discovered()
        );
        Ok(())
    }

    fn run_segment<E: Exchange + ?Sized>(
        &mut self,
        exchange: &mut E,
        indices: &[u64],
    ) -> Result<(Vec<Vec<u8>>, usize), ClientError> {
        let budget_left = self.remaining_queries();
        let mut plan = Vec::with_capacity(indices.len());
        let mut pending = HashSet::new();
        let mut actual = 0u64;

        for &index in indices {
            if self.round.cache.contains_key(&index) || pending.contains(&index) {
                let request = self.cache_hit_request();
                plan.push(Planned::Hit { index, request });
                continue;
            }
            if actual == budget_left {
                break;
            }
            plan.push(Planned::Actual(self.prepare_actual(index)?));
            pending.insert(index);
            actual += 1;
        }

        let taken = plan.len();
        let mut values = Vec::with_capacity(taken);
        for planned in plan {
            let value = match planned {
                Planned::Hit { index, request } => self.finish_hit(exchange, index, request)?,
                Planned::Actual(prepared) => self.finish_actual(exchange, prepared)?,
            };
            values.push(value);
        }

        self.round.query_num += actual;
        if self.round.query_num >= self.params.query_budget {
            log::debug!("query budget of {} reached", self.params.query_budget);
            self.start_round(exchange)?;
        } else {
            self.resolve_amendments();
        }
        Ok((values, taken))
    }

    /// Consume the covering hint for `index` and replace its slot with a
    /// programmed backup. The value itself is learned in `finish_actual`.
    fn prepare_actual(&mut self, index: u64) -> Result<PreparedQuery, ClientError> {
        let params = &self.params;
        let round = &mut self.round;
        let slot = round
            .primaries
            .iter()
            .position(|h| h.covers(&round.prf, params, index))
            .ok_or(ProtocolAbort::HintNotFound { index })?;

        let flip: bool = self.rng.gen();
        let query = build_punctured(params, &round.prf, &round.primaries[slot], index, flip, &mut self.rng);

        let backup = loop {
            let backup = round.backups.pop_front().ok_or(ProtocolAbort::BackupExhausted)?;
            if backup.seed.is_valid() {
                break backup;
            }
        };
        let programmed = PrimaryHint::program(&backup, &round.prf, params, index, None);
        let consumed = std::mem::replace(&mut round.primaries[slot], programmed);

        Ok(PreparedQuery {
            index,
            flip,
            query,
            amend_index: consumed.amend_index(),
            parity: consumed.parity,
        })
    }

    fn finish_actual<E: Exchange + ?Sized>(
        &mut self,
        exchange: &mut E,
        prepared: PreparedQuery,
    ) -> Result<Vec<u8>, ClientError> {
        let reply = exchange.exchange(Request::Punctured(prepared.query))?;
        let parities = expect_parities(reply, self.params.entry_size)?;

        let mut value = if prepared.flip { parities.right } else { parities.left };
        xor_bytes_inplace(&mut value, &prepared.parity);
        if let Some(amend) = prepared.amend_index {
            let known = self
                .round
                .cached_value(amend)
                .ok_or(ProtocolAbort::UnresolvedAmendment { index: amend })?;
            xor_bytes_inplace(&mut value, known);
        }

        self.round.cache.insert(
            prepared.index,
            CacheEntry { value: value.clone(), origin: CacheOrigin::Queried },
        );
        self.stats.actual_queries += 1;
        Ok(value)
    }

    fn finish_hit<E: Exchange + ?Sized>(
        &mut self,
        exchange: &mut E,
        index: u64,
        request: Request,
    ) -> Result<Vec<u8>, ClientError> {
        let reply = exchange.exchange(request)?;
        let checked = match self.config.cache_hit_policy {
            CacheHitPolicy::DummyQuery => expect_parities(reply, self.params.entry_size).map(|_| ()),
            CacheHitPolicy::EmptyRequest => expect_empty(reply),
        };
        match checked {
            Ok(()) => {}
            Err(ProtocolAbort::Rejected { code, message }) => {
                log::warn!("cache-hit request rejected ({:?}): {}", code, message);
            }
            Err(err) => return Err(err.into()),
        }

        let entry = self.round.cache.get(&index).ok_or_else(|| {
            ProtocolAbort::MalformedPayload(format!("index {} missing from cache", index))
        })?;
        match entry.origin {
            CacheOrigin::Discovered => self.stats.discovered_hits += 1,
            CacheOrigin::Queried => self.stats.cache_hits += 1,
        }
        Ok(entry.value.clone())
    }

    fn cache_hit_request(&mut self) -> Request {
        match self.config.cache_hit_policy {
            CacheHitPolicy::EmptyRequest => Request::Empty,
            CacheHitPolicy::DummyQuery => Request::Punctured(self.dummy_query()),
        }
    }

    /// A punctured query from a throwaway hint, indistinguishable in shape
    /// from a real one.
    fn dummy_query(&mut self) -> PuncturedQuery {
        let params = &self.params;
        let round = &mut self.round;
        let seed = loop {
            let id = u32::MAX - (round.dummy_counter % DUMMY_ID_FLOOR as u32);
            round.dummy_counter = round.dummy_counter.wrapping_add(1);
            let seed = HintSeed::derive(&round.prf, id, params.chunk_num as u32);
            if seed.is_valid() {
                break seed;
            }
        };
        let target_chunk = loop {
            let chunk = self.rng.gen_range(0..params.chunk_num);
            if seed.covers_chunk(&round.prf, chunk) {
                break chunk;
            }
        };
        let index = params.index_of(target_chunk, seed.offset_in_chunk(&round.prf, params, target_chunk));
        let extra = pick_extra_index(&round.prf, params, seed, &mut self.rng);
        let hint = PrimaryHint::direct(seed, extra, 0);
        let flip: bool = self.rng.gen();
        build_punctured(params, &round.prf, &hint, index, flip, &mut self.rng)
    }

    /// Complete every programmed hint whose pending value is now cached.
    fn resolve_amendments(&mut self) {
        let round = &mut self.round;
        for hint in round.primaries.iter_mut() {
            if let Some(index) = hint.amend_index() {
                if let Some(entry) = round.cache.get(&index) {
                    hint.amend(&entry.value);
                }
            }
        }
    }
}

/// Build the punctured query for `index` out of the covering `hint`.
///
/// The real side is the covered set minus `index`; the target chunk moves to
/// the other side with a fresh offset. `flip` swaps which side is sent as left.
pub fn build_punctured<R: Rng + ?Sized>(
    params: &Params,
    prf: &Prf,
    hint: &PrimaryHint,
    index: u64,
    flip: bool,
    rng: &mut R,
) -> PuncturedQuery {
    let target = params.chunk_of(index);
    let extra_chunk = params.chunk_of(hint.extra_index);
    let num_chunks = params.chunk_num as usize;
    let mut mask = vec![0u8; bitmask_len(num_chunks)];
    let mut offsets = Vec::with_capacity(num_chunks);

    for chunk in 0..params.chunk_num {
        let (real, offset) = if chunk == target {
            (false, rng.gen_range(0..params.chunk_size))
        } else if chunk == extra_chunk {
            (true, params.offset_in_chunk(hint.extra_index))
        } else {
            let (select, raw) = prf.expand(hint.seed.id, chunk as u32);
            ((select < hint.seed.cutoff) != hint.flipped, raw % params.chunk_size)
        };
        if real != flip {
            set_bit(&mut mask, chunk as usize);
        }
        offsets.push(offset as u32);
    }
    PuncturedQuery { mask, offsets }
}
