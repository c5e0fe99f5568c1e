use cppir::client::Client;
use cppir::config::{CacheHitPolicy, ClientConfig};
use cppir::messages::{bit_is_set, ClientError, Parities, ProtocolAbort};
use cppir::online::{ErrorCode, Exchange, OnlineError, Reply, Request};
use cppir::online_server::handle_request;
use cppir::preprocess::CacheOrigin;
use cppir::server::{InMemoryDb, Server};
use cppir::Params;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

fn random_entries(n: u64, entry_size: usize, seed: u64) -> Vec<Vec<u8>> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let mut e = vec![0u8; entry_size];
            rng.fill(&mut e[..]);
            e
        })
        .collect()
}

fn make_server(params: &Params, entries: &[Vec<u8>]) -> Server<InMemoryDb> {
    let db = InMemoryDb::from_entries(entries).unwrap();
    Server::with_rng(db, params.clone(), &mut ChaCha20Rng::seed_from_u64(99)).unwrap()
}

fn config(seed: u64) -> ClientConfig {
    ClientConfig::default().with_seed(seed).with_batch_chunks(2)
}

/// Forwards to a server and keeps a copy of every request.
struct Recorder<'a> {
    server: &'a mut Server<InMemoryDb>,
    requests: Vec<Request>,
}

impl Exchange for Recorder<'_> {
    fn exchange(&mut self, request: Request) -> Result<Reply, OnlineError> {
        self.requests.push(request.clone());
        Ok(handle_request(self.server, request))
    }
}

/// Lets `f` rewrite requests or replies on their way through.
struct Tamper<'a, F> {
    server: &'a mut Server<InMemoryDb>,
    f: F,
}

impl<F: FnMut(Request, &Server<InMemoryDb>) -> Reply> Exchange for Tamper<'_, F> {
    fn exchange(&mut self, request: Request) -> Result<Reply, OnlineError> {
        Ok((self.f)(request, self.server))
    }
}

#[test]
fn test_round_trip_small_database() {
    // N = 16, L = 8, lambda = 8: four chunks of four entries, entry i is i repeated.
    let entries: Vec<Vec<u8>> = (0u8..16).map(|i| vec![i; 8]).collect();
    let params = Params::new(16, 8, 8).unwrap();
    assert_eq!((params.chunk_num, params.chunk_size), (4, 4));
    let budget = params.query_budget;
    let mut server = make_server(&params, &entries);
    let mut client = Client::init(params, config(1), &mut server).unwrap();

    for index in 0..16u64 {
        assert_eq!(client.get(&mut server, index).unwrap(), entries[index as usize]);
    }
    assert_eq!(client.stats().actual_queries, 16);
    assert_eq!(client.rounds_completed(), 16 / budget);
    assert_eq!(client.query_num(), 16 % budget);

    let update = server.apply_update(5, &[0xEE; 8]).unwrap();
    client.apply_update(&update).unwrap();
    assert_eq!(client.get(&mut server, 5).unwrap(), vec![0xEE; 8]);
    assert!(!client.is_poisoned());
}

#[test]
fn test_completeness_across_rounds() {
    // Small lambda, several rounds per session, many independent sessions.
    let params = Params::new(64, 8, 8).unwrap().with_query_budget(8).unwrap();
    let entries = random_entries(64, 8, 2);
    let mut server = make_server(&params, &entries);

    for seed in 0..24u64 {
        let mut client = Client::init(params.clone(), config(100 + seed), &mut server).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        for _ in 0..40 {
            let index = rng.gen_range(0..64u64);
            match client.get(&mut server, index) {
                Ok(value) => assert_eq!(value, entries[index as usize], "seed {}", seed),
                Err(err) => panic!("seed {} index {}: {}", seed, index, err),
            }
            assert!(client.query_num() < 8);
        }
        let stats = client.stats();
        assert_eq!(stats.rounds_completed, stats.actual_queries / 8);
        assert!(stats.rounds_completed >= 2);
    }
}

#[test]
fn test_completeness_larger_database() {
    let params = Params::new(1024, 4, 8).unwrap().with_query_budget(40).unwrap();
    let entries = random_entries(1024, 4, 3);
    let mut server = make_server(&params, &entries);
    let mut client = Client::init(params, config(3), &mut server).unwrap();

    let mut rng = ChaCha20Rng::seed_from_u64(4);
    let indices: Vec<u64> = (0..100)
        .map(|_| rng.gen_range(0..1024u64))
        .collect();
    for batch in indices.chunks(7) {
        let values = client.get_batch(&mut server, batch).unwrap();
        for (index, value) in batch.iter().zip(values) {
            assert_eq!(value, entries[*index as usize]);
        }
    }
    assert!(client.rounds_completed() >= 2);
}

#[test]
fn test_cache_hit_is_idempotent() {
    let params = Params::new(100, 8, 40).unwrap();
    let entries = random_entries(100, 8, 4);
    let mut server = make_server(&params, &entries);
    let mut client = Client::init(params, config(4), &mut server).unwrap();

    let first = client.get(&mut server, 42).unwrap();
    let backups = client.backups_remaining();
    let hints = client.primary_hints().to_vec();
    assert_eq!(client.cache_origin(42), Some(CacheOrigin::Queried));

    let second = client.get(&mut server, 42).unwrap();
    assert_eq!(first, second);
    assert_eq!(client.query_num(), 1);
    assert_eq!(client.backups_remaining(), backups);
    assert_eq!(client.primary_hints(), &hints[..]);
    assert_eq!(client.stats().cache_hits, 1);
}

#[test]
fn test_one_shot_consumption() {
    let params = Params::new(100, 8, 40).unwrap();
    let entries = random_entries(100, 8, 5);
    let mut server = make_server(&params, &entries);
    let mut client = Client::init(params, config(5), &mut server).unwrap();

    for index in [7u64, 61, 99] {
        let before = client.primary_hints().to_vec();
        let backups = client.backups_remaining();
        client.get(&mut server, index).unwrap();

        let after = client.primary_hints();
        let changed: Vec<usize> = (0..before.len()).filter(|&s| before[s] != after[s]).collect();
        assert_eq!(changed.len(), 1);
        let slot = changed[0];
        assert!(before[slot].covers(client.round_prf(), client.params(), index));
        assert!(after[slot].is_programmed());
        assert_eq!(after[slot].extra_index, index);
        assert_eq!(after[slot].amend_index(), None);
        assert_eq!(client.backups_remaining(), backups - 1);
    }
}

#[test]
fn test_budget_closure_starts_new_round() {
    let params = Params::new(64, 8, 40).unwrap().with_query_budget(3).unwrap();
    let entries = random_entries(64, 8, 6);
    let mut server = make_server(&params, &entries);
    let mut client = Client::init(params, config(6), &mut server).unwrap();

    client.get(&mut server, 1).unwrap();
    client.get(&mut server, 2).unwrap();
    assert_eq!(client.rounds_completed(), 0);
    assert_eq!(client.remaining_queries(), 1);

    let before = client.primary_hints().to_vec();
    client.get(&mut server, 3).unwrap();
    assert_eq!(client.rounds_completed(), 1);
    assert_ne!(client.primary_hints(), &before[..]);
    assert_eq!(client.query_num(), 0);
    assert_eq!(client.remaining_queries(), 3);
    // A fresh round forgets earlier answers.
    assert_ne!(client.cache_origin(3), Some(CacheOrigin::Queried));
}

#[test]
fn test_batch_straddles_budget() {
    let params = Params::new(64, 8, 40).unwrap().with_query_budget(4).unwrap();
    let entries = random_entries(64, 8, 7);
    let mut server = make_server(&params, &entries);
    let mut client = Client::init(params, config(7), &mut server).unwrap();

    let indices: Vec<u64> = vec![10, 11, 12, 10, 13, 14, 15, 16, 17, 18, 11];
    let values = client.get_batch(&mut server, &indices).unwrap();
    for (index, value) in indices.iter().zip(&values) {
        assert_eq!(value, &entries[*index as usize]);
    }
    // 10 actual lookups in segments of 4, 4 and 2. The repeated 10 is a hit in
    // the first segment; 11 comes back in the third segment after a new round.
    let stats = client.stats();
    assert_eq!(stats.rounds_completed, 2);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(client.query_num(), 2);
}

#[test]
fn test_update_propagation() {
    let params = Params::new(64, 8, 40).unwrap();
    let mut entries = random_entries(64, 8, 8);
    let mut server = make_server(&params, &entries);
    let mut client = Client::init(params, config(8), &mut server).unwrap();

    assert_eq!(client.get(&mut server, 20).unwrap(), entries[20]);

    for (index, value) in [(20u64, vec![0xAA; 8]), (33, vec![0x01; 8]), (20, vec![0x5C; 8])] {
        let update = server.apply_update(index, &value).unwrap();
        client.apply_update(&update).unwrap();
        entries[index as usize] = value;
    }
    for index in [20u64, 33, 34, 0] {
        assert_eq!(client.get(&mut server, index).unwrap(), entries[index as usize]);
    }
    assert_eq!(client.stats().updates_applied, 3);
}

#[test]
fn test_dummy_queries_look_like_real_ones() {
    let params = Params::new(100, 8, 40).unwrap();
    let entries = random_entries(100, 8, 9);
    let mut server = make_server(&params, &entries);
    let mut client = Client::init(params.clone(), config(9), &mut server).unwrap();

    let mut recorder = Recorder { server: &mut server, requests: Vec::new() };
    client.get_batch(&mut recorder, &[3, 3, 50, 3, 50]).unwrap();

    let punctured: Vec<_> = recorder
        .requests
        .iter()
        .filter_map(|r| match r {
            Request::Punctured(q) => Some(q),
            _ => None,
        })
        .collect();
    assert_eq!(punctured.len(), 5);
    for q in punctured {
        assert_eq!(q.offsets.len() as u64, params.chunk_num);
        let left = (0..params.chunk_num as usize).filter(|&c| bit_is_set(&q.mask, c)).count();
        assert_eq!(left as u64, params.chunk_num / 2);
    }
    assert_eq!(client.stats().actual_queries, 2);
    assert_eq!(client.stats().cache_hits, 3);
}

#[test]
fn test_empty_request_policy() {
    let params = Params::new(100, 8, 40).unwrap();
    let entries = random_entries(100, 8, 10);
    let mut server = make_server(&params, &entries);
    let cfg = config(10).with_cache_hit_policy(CacheHitPolicy::EmptyRequest);
    let mut client = Client::init(params, cfg, &mut server).unwrap();

    let mut recorder = Recorder { server: &mut server, requests: Vec::new() };
    let values = client.get_batch(&mut recorder, &[8, 8, 8]).unwrap();
    assert!(values.iter().all(|v| v == &entries[8]));
    let empties = recorder.requests.iter().filter(|r| matches!(r, Request::Empty)).count();
    assert_eq!(empties, 2);
}

#[test]
fn test_rejected_cache_hit_is_tolerated() {
    let params = Params::new(100, 8, 40).unwrap();
    let entries = random_entries(100, 8, 11);
    let mut server = make_server(&params, &entries);
    let cfg = config(11).with_cache_hit_policy(CacheHitPolicy::EmptyRequest);
    let mut client = Client::init(params, cfg, &mut server).unwrap();

    let mut tamper = Tamper {
        server: &mut server,
        f: |request: Request, server: &Server<InMemoryDb>| match request {
            Request::Empty => Reply::Error { code: ErrorCode::Server, message: "busy".into() },
            other => handle_request(server, other),
        },
    };
    assert_eq!(client.get(&mut tamper, 4).unwrap(), entries[4]);
    assert_eq!(client.get(&mut tamper, 4).unwrap(), entries[4]);
    assert!(!client.is_poisoned());
}

#[test]
fn test_unbalanced_query_aborts_and_poisons() {
    let params = Params::new(100, 8, 40).unwrap();
    let entries = random_entries(100, 8, 12);
    let mut server = make_server(&params, &entries);
    let mut client = Client::init(params, config(12), &mut server).unwrap();

    let mut tamper = Tamper {
        server: &mut server,
        f: |request: Request, server: &Server<InMemoryDb>| match request {
            Request::Punctured(mut q) => {
                // Moving one chunk to the other side unbalances the sides.
                q.mask[0] ^= 1;
                handle_request(server, Request::Punctured(q))
            }
            other => handle_request(server, other),
        },
    };
    let err = client.get(&mut tamper, 30).unwrap_err();
    assert!(matches!(
        err,
        ClientError::Abort(ProtocolAbort::Rejected { code: ErrorCode::SetSizeMismatch, .. })
    ));
    assert!(client.is_poisoned());
    assert!(matches!(client.get(&mut server, 30), Err(ClientError::Poisoned)));
}

#[test]
fn test_malformed_reply_poisons() {
    let params = Params::new(100, 8, 40).unwrap();
    let entries = random_entries(100, 8, 13);
    let mut server = make_server(&params, &entries);
    let mut client = Client::init(params, config(13), &mut server).unwrap();

    let mut tamper = Tamper {
        server: &mut server,
        f: |request: Request, server: &Server<InMemoryDb>| match request {
            Request::Punctured(_) => Reply::Parities(Parities { left: vec![0; 3], right: vec![0; 8] }),
            other => handle_request(server, other),
        },
    };
    let err = client.get(&mut tamper, 1).unwrap_err();
    assert!(matches!(err, ClientError::Abort(ProtocolAbort::MalformedPayload(_))));
    assert!(client.is_poisoned());
}

#[test]
fn test_invalid_index_does_not_poison() {
    let params = Params::new(16, 8, 40).unwrap();
    let entries = random_entries(16, 8, 14);
    let mut server = make_server(&params, &entries);
    let mut client = Client::init(params, config(14), &mut server).unwrap();

    // Padding indices are not addressable.
    assert!(matches!(
        client.get(&mut server, 16),
        Err(ClientError::InvalidIndex { index: 16, num_entries: 16 })
    ));
    assert!(matches!(
        client.get_batch(&mut server, &[1, 2, 400]),
        Err(ClientError::InvalidIndex { index: 400, .. })
    ));
    assert_eq!(client.query_num(), 0);
    assert!(!client.is_poisoned());
    assert_eq!(client.get(&mut server, 2).unwrap(), entries[2]);
}

#[test]
fn test_discovered_entries_are_served_from_cache() {
    // Few hints over many chunks leaves some entries uncovered.
    let params = Params::new(256, 4, 1).unwrap();
    let entries = random_entries(256, 4, 15);
    let mut server = make_server(&params, &entries);
    let mut client = Client::init(params, config(15), &mut server).unwrap();

    let discovered: Vec<u64> = (0..256)
        .filter(|&i| client.cache_origin(i) == Some(CacheOrigin::Discovered))
        .collect();
    assert!(!discovered.is_empty());
    for &index in discovered.iter().take(3) {
        assert!(client.covering_slots(index).is_empty());
        assert_eq!(client.get(&mut server, index).unwrap(), entries[index as usize]);
    }
    assert_eq!(client.stats().actual_queries, 0);
    assert_eq!(client.query_num(), 0);
    assert_eq!(client.stats().discovered_hits, discovered.len().min(3) as u64);
}

#[test]
fn test_refresh_resets_round() {
    let params = Params::new(64, 8, 40).unwrap();
    let entries = random_entries(64, 8, 16);
    let mut server = make_server(&params, &entries);
    let mut client = Client::init(params, config(16), &mut server).unwrap();

    client.get(&mut server, 9).unwrap();
    client.refresh(&mut server).unwrap();
    assert_eq!(client.query_num(), 0);
    assert_eq!(client.rounds_completed(), 1);
    assert!(!client.is_cached(9));
    assert_eq!(client.get(&mut server, 9).unwrap(), entries[9]);
}
