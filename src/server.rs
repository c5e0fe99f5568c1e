use crate::hints::xor_bytes_inplace;
use crate::messages::{
    bit_is_set, bitmask_len, has_trailing_bits, EntryUpdate, Parities, ProtocolAbort,
    PuncturedQuery, ServerError,
};
use crate::params::Params;
use memmap2::Mmap;
use rand::RngCore;
use std::fs::File;
use std::path::Path;

pub trait Db {
    fn num_entries(&self) -> u64;
    fn entry_size(&self) -> usize;
    fn entry(&self, index: u64) -> Result<&[u8], ServerError>;
    fn update(&mut self, index: u64, entry: &[u8]) -> Result<(), ServerError>;
}

#[derive(Debug)]
pub struct InMemoryDb {
    entry_size: usize,
    entries: Vec<u8>,
}

impl InMemoryDb {
    pub fn new(entries: Vec<u8>, entry_size: usize) -> Result<Self, ServerError> {
        check_layout(entries.len(), entry_size)?;
        Ok(Self { entry_size, entries })
    }

    pub fn from_entries(entries: &[Vec<u8>]) -> Result<Self, ServerError> {
        let entry_size = entries.first().map_or(0, |e| e.len());
        let mut flat = Vec::with_capacity(entries.len() * entry_size);
        for entry in entries {
            if entry.len() != entry_size {
                return Err(ServerError::EntrySizeMismatch { expected: entry_size, got: entry.len() });
            }
            flat.extend_from_slice(entry);
        }
        Self::new(flat, entry_size)
    }
}

impl Db for InMemoryDb {
    fn num_entries(&self) -> u64 {
        (self.entries.len() / self.entry_size) as u64
    }

    fn entry_size(&self) -> usize {
        self.entry_size
    }

    fn entry(&self, index: u64) -> Result<&[u8], ServerError> {
        let start = entry_start(index, self.num_entries(), self.entry_size)?;
        Ok(&self.entries[start..start + self.entry_size])
    }

    fn update(&mut self, index: u64, entry: &[u8]) -> Result<(), ServerError> {
        if entry.len() != self.entry_size {
            return Err(ServerError::EntrySizeMismatch { expected: self.entry_size, got: entry.len() });
        }
        let start = entry_start(index, self.num_entries(), self.entry_size)?;
        self.entries[start..start + self.entry_size].copy_from_slice(entry);
        Ok(())
    }
}

/// Read-only database backed by a memory-mapped file of `N * entry_size` bytes.
#[derive(Debug)]
pub struct MmapDb {
    entry_size: usize,
    map: Mmap,
}

impl MmapDb {
    pub fn open<P: AsRef<Path>>(path: P, entry_size: usize) -> Result<Self, ServerError> {
        let file = File::open(path)?;
        // SAFETY: the file is opened read-only and the map never outlives it.
        let map = unsafe { Mmap::map(&file)? };
        check_layout(map.len(), entry_size)?;
        Ok(Self { entry_size, map })
    }
}

impl Db for MmapDb {
    fn num_entries(&self) -> u64 {
        (self.map.len() / self.entry_size) as u64
    }

    fn entry_size(&self) -> usize {
        self.entry_size
    }

    fn entry(&self, index: u64) -> Result<&[u8], ServerError> {
        let start = entry_start(index, self.num_entries(), self.entry_size)?;
        Ok(&self.map[start..start + self.entry_size])
    }

    fn update(&mut self, _index: u64, _entry: &[u8]) -> Result<(), ServerError> {
        Err(ServerError::ReadOnly)
    }
}

fn check_layout(len: usize, entry_size: usize) -> Result<(), ServerError> {
    if entry_size == 0 || len % entry_size != 0 {
        return Err(ServerError::EntrySizeMismatch { expected: entry_size, got: len });
    }
    if len == 0 {
        return Err(ServerError::ParamsMismatch("database is empty".into()));
    }
    Ok(())
}

fn entry_start(index: u64, num_entries: u64, entry_size: usize) -> Result<usize, ServerError> {
    if index >= num_entries {
        return Err(ServerError::IndexOutOfRange { index, num_entries });
    }
    Ok(index as usize * entry_size)
}

/// Responder holding the database and the random padding up to
/// `chunk_size * chunk_num` entries.
pub struct Server<D: Db> {
    db: D,
    params: Params,
    padding: Vec<u8>,
}

impl<D: Db> Server<D> {
    pub fn new(db: D, params: Params) -> Result<Self, ServerError> {
        Self::with_rng(db, params, &mut rand::thread_rng())
    }

    /// Build a server drawing dummy padding entries from `rng`.
    pub fn with_rng<R: RngCore + ?Sized>(db: D, params: Params, rng: &mut R) -> Result<Self, ServerError> {
        params
            .validate()
            .map_err(|e| ServerError::ParamsMismatch(e.to_string()))?;
        if db.num_entries() != params.num_entries {
            return Err(ServerError::ParamsMismatch(format!(
                "db has {} entries, params expect {}",
                db.num_entries(),
                params.num_entries
            )));
        }
        if db.entry_size() != params.entry_size {
            return Err(ServerError::EntrySizeMismatch {
                expected: params.entry_size,
                got: db.entry_size(),
            });
        }
        let pad_entries = (params.padded_entries() - params.num_entries) as usize;
        let mut padding = vec![0u8; pad_entries * params.entry_size];
        rng.fill_bytes(&mut padding);
        Ok(Self { db, params, padding })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Entry at a padded index.
    pub fn entry(&self, index: u64) -> Result<&[u8], ServerError> {
        if index < self.params.num_entries {
            return self.db.entry(index);
        }
        if index >= self.params.padded_entries() {
            return Err(ServerError::IndexOutOfRange {
                index,
                num_entries: self.params.padded_entries(),
            });
        }
        let start = (index - self.params.num_entries) as usize * self.params.entry_size;
        Ok(&self.padding[start..start + self.params.entry_size])
    }

    /// Concatenated entries of chunks `first_chunk..first_chunk + num_chunks`.
    pub fn stream_chunks(&self, first_chunk: u64, num_chunks: u64) -> Result<Vec<u8>, ServerError> {
        let end = first_chunk.checked_add(num_chunks);
        if num_chunks == 0 || end.map_or(true, |e| e > self.params.chunk_num) {
            return Err(ServerError::ChunkOutOfRange { first: first_chunk, count: num_chunks });
        }
        let start = self.params.index_of(first_chunk, 0);
        let count = num_chunks * self.params.chunk_size;
        let mut data = Vec::with_capacity(count as usize * self.params.entry_size);
        for index in start..start + count {
            data.extend_from_slice(self.entry(index)?);
        }
        Ok(data)
    }

    /// Answer a punctured query with the parities of both sides.
    ///
    /// The sides must be of equal size; anything else aborts the protocol.
    pub fn answer(&self, query: &PuncturedQuery) -> Result<Parities, ServerError> {
        let num_chunks = self.params.chunk_num as usize;
        if query.offsets.len() != num_chunks {
            return Err(ProtocolAbort::MalformedPayload(format!(
                "expected {} offsets, got {}",
                num_chunks,
                query.offsets.len()
            ))
            .into());
        }
        if query.mask.len() != bitmask_len(num_chunks) || has_trailing_bits(&query.mask, num_chunks) {
            return Err(ProtocolAbort::MalformedPayload("membership mask has wrong shape".into()).into());
        }

        let left = query.left_len(num_chunks) as u64;
        let right = self.params.chunk_num - left;
        if left != right {
            return Err(ProtocolAbort::SetSizeMismatch { left, right }.into());
        }

        let mut left_parity = vec![0u8; self.params.entry_size];
        let mut right_parity = vec![0u8; self.params.entry_size];
        for (chunk, &offset) in query.offsets.iter().enumerate() {
            let offset = u64::from(offset);
            if offset >= self.params.chunk_size {
                return Err(ServerError::OffsetOutOfRange { chunk: chunk as u64, offset });
            }
            let entry = self.entry(self.params.index_of(chunk as u64, offset))?;
            if bit_is_set(&query.mask, chunk) {
                xor_bytes_inplace(&mut left_parity, entry);
            } else {
                xor_bytes_inplace(&mut right_parity, entry);
            }
        }
        Ok(Parities { left: left_parity, right: right_parity })
    }

    /// Overwrite a real entry and return the notification clients must apply.
    pub fn apply_update(&mut self, index: u64, new_entry: &[u8]) -> Result<EntryUpdate, ServerError> {
        if new_entry.len() != self.params.entry_size {
            return Err(ServerError::EntrySizeMismatch {
                expected: self.params.entry_size,
                got: new_entry.len(),
            });
        }
        let mut delta = self.db.entry(index)?.to_vec();
        xor_bytes_inplace(&mut delta, new_entry);
        self.db.update(index, new_entry)?;
        Ok(EntryUpdate { index, delta })
    }
}
