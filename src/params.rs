//! Chunk geometry and hint population sizes.

use crate::messages::ConfigError;
use serde::{Deserialize, Serialize};

/// Hint ids at or above this value are reserved for cache-hit dummy queries.
pub const DUMMY_ID_FLOOR: u64 = (u32::MAX / 2) as u64;

/// Parameters for the client-preprocessing PIR scheme.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Number of real database entries (N).
    pub num_entries: u64,
    /// Size of each entry in bytes (L).
    pub entry_size: usize,
    /// Statistical security parameter (lambda).
    pub security_param: u32,
    /// Entries per chunk.
    pub chunk_size: u64,
    /// Number of chunks (always even, at least 2).
    pub chunk_num: u64,
    /// Primary hint slots (M1).
    pub num_primary_hints: u64,
    /// Backup hints available per round (M2).
    pub num_backup_hints: u64,
    /// Actual queries per round before preprocessing reruns (Q).
    pub query_budget: u64,
}

impl Params {
    /// Derive parameters from database size, entry size, and lambda.
    ///
    /// `chunk_num` is `ceil(sqrt(N))` rounded up to even, `chunk_size` is
    /// `ceil(N / chunk_num)`. With `base = chunk_size * (lambda + 1)` the
    /// scheme keeps `2 * base` primary hints, `base` backups and a budget of
    /// `2 * base / 5` actual queries per round. A primary covers only half
    /// the chunks, so doubling the pool keeps every index covered about
    /// `lambda + 1` times.
    pub fn new(num_entries: u64, entry_size: usize, security_param: u32) -> Result<Self, ConfigError> {
        if num_entries == 0 {
            return Err(ConfigError::EmptyDatabase);
        }
        if entry_size == 0 {
            return Err(ConfigError::ZeroEntrySize);
        }
        if security_param == 0 {
            return Err(ConfigError::ZeroSecurityParam);
        }

        let mut chunk_num = ((num_entries as f64).sqrt().ceil() as u64).max(2);
        if chunk_num % 2 == 1 {
            chunk_num += 1;
        }
        let chunk_size = num_entries.div_ceil(chunk_num).max(2);

        let base = chunk_size
            .checked_mul(u64::from(security_param) + 1)
            .ok_or(ConfigError::Overflow)?;
        let num_primary_hints = base.checked_mul(2).ok_or(ConfigError::Overflow)?;
        let num_backup_hints = base;
        let query_budget = (num_primary_hints / 5).max(1);

        let params = Self {
            num_entries,
            entry_size,
            security_param,
            chunk_size,
            chunk_num,
            num_primary_hints,
            num_backup_hints,
            query_budget,
        };
        params.validate()?;
        Ok(params)
    }

    /// Replace the derived per-round budget.
    pub fn with_query_budget(mut self, query_budget: u64) -> Result<Self, ConfigError> {
        self.query_budget = query_budget;
        self.validate()?;
        Ok(self)
    }

    /// Check every invariant the protocol relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_entries == 0 {
            return Err(ConfigError::EmptyDatabase);
        }
        if self.entry_size == 0 {
            return Err(ConfigError::ZeroEntrySize);
        }
        if self.security_param == 0 {
            return Err(ConfigError::ZeroSecurityParam);
        }
        if self.chunk_num < 2 || self.chunk_num % 2 == 1 {
            return Err(ConfigError::InvalidGeometry("chunk_num must be even and at least 2"));
        }
        if self.chunk_size < 2 {
            return Err(ConfigError::InvalidGeometry("chunk_size must be at least 2"));
        }
        if self.chunk_num > u64::from(u32::MAX) || self.chunk_size > u64::from(u32::MAX) {
            return Err(ConfigError::InvalidGeometry("chunk dimensions must fit in u32"));
        }
        let padded = self
            .chunk_size
            .checked_mul(self.chunk_num)
            .ok_or(ConfigError::Overflow)?;
        if padded < self.num_entries {
            return Err(ConfigError::InvalidGeometry("chunks do not cover the database"));
        }
        let total = self.total_hints();
        if total >= DUMMY_ID_FLOOR {
            return Err(ConfigError::TooManyHints(total));
        }
        if self.query_budget == 0 {
            return Err(ConfigError::ZeroQueryBudget);
        }
        if self.query_budget >= self.num_backup_hints {
            return Err(ConfigError::BudgetExceedsBackups {
                budget: self.query_budget,
                backups: self.num_backup_hints,
            });
        }
        Ok(())
    }

    /// Size of the padded index space.
    pub fn padded_entries(&self) -> u64 {
        self.chunk_size * self.chunk_num
    }

    /// Return the chunk containing the given index.
    #[inline]
    pub fn chunk_of(&self, index: u64) -> u64 {
        index / self.chunk_size
    }

    /// Return the offset of the index within its chunk.
    #[inline]
    pub fn offset_in_chunk(&self, index: u64) -> u64 {
        index % self.chunk_size
    }

    #[inline]
    pub fn index_of(&self, chunk: u64, offset: u64) -> u64 {
        chunk * self.chunk_size + offset
    }

    /// Total hint count (primary + backup).
    pub fn total_hints(&self) -> u64 {
        self.num_primary_hints.saturating_add(self.num_backup_hints)
    }
}
