use clap::Parser;
use cppir::config::{CacheHitPolicy, ClientConfig};
use cppir::online_client::fetch_params;
use cppir::online_transport::FramedIo;
use cppir::Client;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

const DEFAULT_TCP_TIMEOUT_SECS: u64 = 60;

#[derive(Parser)]
#[command(about = "Retrieve entries privately from a cppir server")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:4000")]
    server: String,
    /// Explicit indices to fetch; random ones are drawn otherwise.
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    indices: Vec<u64>,
    #[arg(long, default_value = "10")]
    query_count: u64,
    #[arg(long, default_value = "1")]
    batch_size: usize,
    #[arg(long)]
    seed: Option<u64>,
    /// Send empty requests for cache hits instead of dummy queries.
    #[arg(long)]
    empty_cache_hits: bool,
    #[arg(long, default_value = "16")]
    preprocess_batch: u64,
}

fn connect_with_timeouts(addr: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    let addrs = addr
        .to_socket_addrs()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "failed to resolve socket addresses"))?;
    for socket_addr in addrs {
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                return Ok(stream);
            }
            Err(err) => {
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "failed to resolve socket addresses")
    }))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let timeout = Duration::from_secs(DEFAULT_TCP_TIMEOUT_SECS);
    let mut transport = FramedIo::new(connect_with_timeouts(&args.server, timeout)?);

    let params = fetch_params(&mut transport)?;
    log::info!(
        "server params: lambda={} budget={}",
        params.security_param,
        params.query_budget
    );
    let policy = if args.empty_cache_hits {
        CacheHitPolicy::EmptyRequest
    } else {
        CacheHitPolicy::DummyQuery
    };
    let mut config = ClientConfig::default()
        .with_cache_hit_policy(policy)
        .with_batch_chunks(args.preprocess_batch);
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    let start = Instant::now();
    let mut client = Client::init(params.clone(), config, &mut transport)?;
    log::info!("preprocessing took {:?}", start.elapsed());

    let indices = if args.indices.is_empty() {
        let mut rng = match args.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed ^ 0x5eed),
            None => ChaCha20Rng::from_entropy(),
        };
        (0..args.query_count)
            .map(|_| rng.gen_range(0..params.num_entries))
            .collect()
    } else {
        args.indices.clone()
    };

    let start = Instant::now();
    for batch in indices.chunks(args.batch_size.max(1)) {
        let values = client.get_batch(&mut transport, batch)?;
        for (index, value) in batch.iter().zip(values) {
            println!("{} {}", index, to_hex(&value));
        }
    }
    let stats = client.stats();
    log::info!(
        "{} lookups in {:?}: actual={} cache_hits={} discovered={} rounds={}",
        indices.len(),
        start.elapsed(),
        stats.actual_queries,
        stats.cache_hits,
        stats.discovered_hits,
        stats.rounds_completed
    );
    Ok(())
}
