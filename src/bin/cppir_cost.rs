use clap::Parser;
use cppir::cost::{estimate, CostReport};
use cppir::params::Params;

#[derive(Parser)]
#[command(about = "Estimate PIR resource costs by component")]
struct Args {
    /// Number of database entries
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    num_entries: u64,

    /// Entry size in bytes
    #[arg(long, default_value = "40")]
    entry_size: usize,

    /// Security parameter (lambda)
    #[arg(long, default_value = "80")]
    lambda: u32,

    /// Override the per-round query budget
    #[arg(long)]
    query_budget: Option<u64>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut params = Params::new(args.num_entries, args.entry_size, args.lambda)?;
    if let Some(budget) = args.query_budget {
        params = params.with_query_budget(budget)?;
    }
    let report = estimate(&params);

    if args.json {
        print_json(&report);
    } else {
        print!("{}", report);
    }
    Ok(())
}

fn print_json(report: &CostReport) {
    println!(
        r#"{{ "num_entries": {}, "entry_size": {}, "security_param": {}, "chunk_size": {}, "chunk_num": {}, "num_primary_hints": {}, "num_backup_hints": {}, "query_budget": {}, "client_hint_storage_bytes": {}, "server_db_storage_bytes": {}, "offline_bandwidth_bytes": {}, "offline_bandwidth_per_query_bytes": {}, "online_upload_bytes": {}, "online_download_bytes": {}, "online_query_bandwidth_bytes": {}, "server_xor_bytes_per_query": {} }}"#,
        report.params.num_entries,
        report.params.entry_size,
        report.params.security_param,
        report.params.chunk_size,
        report.params.chunk_num,
        report.params.num_primary_hints,
        report.params.num_backup_hints,
        report.params.query_budget,
        report.client_hint_storage_bytes(),
        report.server_db_storage_bytes,
        report.offline_bandwidth_bytes,
        report.offline_bandwidth_per_query_bytes,
        report.online_upload_bytes,
        report.online_download_bytes,
        report.online_query_bandwidth_bytes,
        report.server_xor_bytes_per_query,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = Args::parse_from(["cppir-cost", "--num-entries", "1000", "--json"]);
        assert_eq!(args.num_entries, 1000);
        assert_eq!(args.entry_size, 40);
        assert!(args.json);
    }
}
