//! Cost estimator for the client-preprocessing PIR protocol.
//!
//! Computes theoretical storage, bandwidth, and computation costs
//! broken down by component, given protocol parameters.

use crate::messages::bitmask_len;
use crate::params::Params;

/// Per-component cost breakdown.
#[derive(Clone, Debug)]
pub struct CostReport {
    pub params: Params,
    pub client_primary_storage_bytes: u64,
    pub client_backup_storage_bytes: u64,
    pub server_db_storage_bytes: u64,
    pub offline_bandwidth_bytes: u64,
    pub offline_bandwidth_per_query_bytes: u64,
    pub online_upload_bytes: u64,
    pub online_download_bytes: u64,
    pub online_query_bandwidth_bytes: u64,
    pub server_xor_bytes_per_query: u64,
}

impl CostReport {
    pub fn client_hint_storage_bytes(&self) -> u64 {
        self.client_primary_storage_bytes + self.client_backup_storage_bytes
    }
}

/// Estimate costs for one round with the given parameters.
pub fn estimate(params: &Params) -> CostReport {
    let entry_size = params.entry_size as u64;

    // Primary: id(4) + cutoff(4) + flipped(1) + extra index(8) + parity.
    let per_primary = 4 + 4 + 1 + 8 + entry_size;
    // Backup: id(4) + cutoff(4) + both side parities.
    let per_backup = 4 + 4 + 2 * entry_size;
    let client_primary_storage_bytes = params.num_primary_hints * per_primary;
    let client_backup_storage_bytes = params.num_backup_hints * per_backup;

    // The server also stores the dummy padding up to the chunk grid.
    let server_db_storage_bytes = params.padded_entries() * entry_size;

    // Preprocessing streams every padded chunk once per round.
    let offline_bandwidth_bytes = params.padded_entries() * entry_size;
    let offline_bandwidth_per_query_bytes = offline_bandwidth_bytes.div_ceil(params.query_budget);

    // Membership mask, one u32 offset per chunk, two length prefixes.
    let online_upload_bytes = bitmask_len(params.chunk_num as usize) as u64 + 4 * params.chunk_num + 16;
    // Two side parities.
    let online_download_bytes = 2 * entry_size;
    let online_query_bandwidth_bytes = online_upload_bytes + online_download_bytes;

    // Every chunk contributes one entry to one side.
    let server_xor_bytes_per_query = params.chunk_num * entry_size;

    CostReport {
        params: params.clone(),
        client_primary_storage_bytes,
        client_backup_storage_bytes,
        server_db_storage_bytes,
        offline_bandwidth_bytes,
        offline_bandwidth_per_query_bytes,
        online_upload_bytes,
        online_download_bytes,
        online_query_bandwidth_bytes,
        server_xor_bytes_per_query,
    }
}

fn mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn kb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

impl std::fmt::Display for CostReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let p = &self.params;
        writeln!(f, "=== PIR Cost Report ===")?;
        writeln!(f, "Parameters:")?;
        writeln!(f, "  num_entries:      {}", p.num_entries)?;
        writeln!(f, "  entry_size:       {} B", p.entry_size)?;
        writeln!(f, "  security_param:   {}", p.security_param)?;
        writeln!(f, "  chunk_size:       {}", p.chunk_size)?;
        writeln!(f, "  chunk_num:        {}", p.chunk_num)?;
        writeln!(f, "  primary hints:    {}", p.num_primary_hints)?;
        writeln!(f, "  backup hints:     {}", p.num_backup_hints)?;
        writeln!(f, "  query budget:     {}", p.query_budget)?;
        writeln!(f)?;
        writeln!(f, "Storage:")?;
        writeln!(
            f,
            "  client hints:     {} ({:.2} MB)",
            self.client_hint_storage_bytes(),
            mb(self.client_hint_storage_bytes())
        )?;
        writeln!(
            f,
            "  server DB:        {} ({:.2} MB)",
            self.server_db_storage_bytes,
            mb(self.server_db_storage_bytes)
        )?;
        writeln!(f)?;
        writeln!(f, "Bandwidth:")?;
        writeln!(
            f,
            "  offline/round:      {} ({:.2} MB)",
            self.offline_bandwidth_bytes,
            mb(self.offline_bandwidth_bytes)
        )?;
        writeln!(
            f,
            "  offline amortized:  {} ({:.2} KB)",
            self.offline_bandwidth_per_query_bytes,
            kb(self.offline_bandwidth_per_query_bytes)
        )?;
        writeln!(
            f,
            "  online upload/q:    {} ({:.2} KB)",
            self.online_upload_bytes,
            kb(self.online_upload_bytes)
        )?;
        writeln!(
            f,
            "  online download/q:  {} ({:.2} KB)",
            self.online_download_bytes,
            kb(self.online_download_bytes)
        )?;
        writeln!(
            f,
            "  online total/q:     {} ({:.2} KB)",
            self.online_query_bandwidth_bytes,
            kb(self.online_query_bandwidth_bytes)
        )?;
        writeln!(f)?;
        writeln!(f, "Computation:")?;
        writeln!(
            f,
            "  server XOR bytes/q: {} ({:.2} KB)",
            self.server_xor_bytes_per_query,
            kb(self.server_xor_bytes_per_query)
        )
    }
}
