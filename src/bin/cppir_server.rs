use clap::Parser;
use cppir::messages::ConfigError;
use cppir::online::RunConfig;
use cppir::online_server::serve;
use cppir::online_transport::FramedIo;
use cppir::params::Params;
use cppir::server::{Db, MmapDb, Server};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

#[derive(Parser)]
#[command(about = "Serve a flat database file to preprocessing PIR clients")]
struct Args {
    #[arg(long)]
    db: String,
    #[arg(long, default_value = "40")]
    entry_size: usize,
    #[arg(long, default_value = "80")]
    lambda: u32,
    #[arg(long)]
    query_budget: Option<u64>,
    #[arg(long, default_value = "127.0.0.1:4000")]
    listen: String,
}

fn handle_client<D: Db>(stream: TcpStream, server: Arc<Server<D>>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    let mut transport = FramedIo::new(stream);
    match serve(&mut transport, &server) {
        Ok(served) => log::info!("{}: served {} requests", peer, served),
        Err(err) => log::warn!("{}: connection dropped: {}", peer, err),
    }
}

/// Params advertised to every client in the `Describe` handshake.
fn server_params(args: &Args, num_entries: u64) -> Result<Params, ConfigError> {
    let params = Params::new(num_entries, args.entry_size, args.lambda)?;
    match args.query_budget {
        Some(budget) => params.with_query_budget(budget),
        None => Ok(params),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let db = MmapDb::open(&args.db, args.entry_size)?;
    let params = server_params(&args, db.num_entries())?;
    log::info!(
        "loaded {} entries of {} B, chunks {}x{}, lambda={} budget={}",
        params.num_entries,
        params.entry_size,
        params.chunk_num,
        params.chunk_size,
        params.security_param,
        params.query_budget
    );
    let server = Arc::new(Server::new(db, params)?);

    let listener = TcpListener::bind(&args.listen)?;
    log::info!("listening on {}", args.listen);
    for stream in listener.incoming() {
        let server = Arc::clone(&server);
        match stream {
            Ok(stream) => {
                thread::spawn(move || handle_client(stream, server));
            }
            Err(err) => log::warn!("accept failed: {}", err),
        }
    }
    Ok(())
}
