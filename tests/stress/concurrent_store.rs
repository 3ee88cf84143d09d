//! Concurrency tests: many threads sharing one store, session registry and
//! audit log.

use std::collections::HashSet;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use healthvault::crypto::hash_password;
use healthvault::storage::record::Metadata;
use healthvault::storage::PartitionIndex;
use healthvault::{
    AuditLog, AuthReason, EncryptedStore, QueryFilter, SessionRegistry, VaultConfig,
};

const KEY: [u8; 32] = [7u8; 32];

fn open_store(root: &std::path::Path) -> (Arc<AuditLog>, Arc<EncryptedStore>) {
    let audit = Arc::new(AuditLog::open(root.join("audit.log")).unwrap());
    let store = Arc::new(EncryptedStore::open(root, Arc::clone(&audit)).unwrap());
    (audit, store)
}

#[test]
fn stress_concurrent_puts_all_indexed() {
    let tmp = tempfile::tempdir().unwrap();
    let (audit, store) = open_store(tmp.path());

    let mut handles = Vec::new();
    for thread_id in 0..16 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..25 {
                store
                    .put(
                        &format!("alice/vitals/t{thread_id:02}_{i:02}"),
                        format!("{thread_id}:{i}").as_bytes(),
                        &Metadata::new(),
                        &KEY,
                    )
                    .expect("put should succeed");
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    // Both the in-memory and the persisted index saw every write.
    assert_eq!(store.list("alice", "vitals").unwrap().len(), 400);
    let persisted = PartitionIndex::load(tmp.path().join("_index.json"));
    assert_eq!(persisted.len(), 400);

    let all = store
        .query("alice", "vitals", &QueryFilter::all(), &KEY)
        .unwrap();
    assert_eq!(all.len(), 400);
    assert_eq!(audit.verify_chain().unwrap(), audit.entries().unwrap().len());
}

#[test]
fn stress_concurrent_inserts_unique_keys() {
    let tmp = tempfile::tempdir().unwrap();
    let (_audit, store) = open_store(tmp.path());
    let keys = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        let keys = Arc::clone(&keys);
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                let key = store
                    .insert("bob", "wellness/mood", b"ok", &Metadata::new(), &KEY)
                    .expect("insert should succeed");
                keys.lock().unwrap().push(key.to_string());
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let keys = keys.lock().unwrap();
    let unique: HashSet<&String> = keys.iter().collect();
    assert_eq!(keys.len(), 400);
    assert_eq!(unique.len(), 400, "generated keys must never collide");
    assert_eq!(store.list("bob", "wellness/mood").unwrap().len(), 400);
}

#[test]
fn stress_concurrent_puts_and_deletes() {
    let tmp = tempfile::tempdir().unwrap();
    let (_audit, store) = open_store(tmp.path());
    for i in 0..100 {
        store
            .put(&format!("carol/sleep/{i:03}"), b"x", &Metadata::new(), &KEY)
            .unwrap();
    }

    let deleter = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in (0..100).step_by(2) {
                store
                    .delete(&format!("carol/sleep/{i:03}"), "carol")
                    .expect("delete should succeed");
            }
        })
    };
    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 100..150 {
                store
                    .put(&format!("carol/sleep/{i:03}"), b"y", &Metadata::new(), &KEY)
                    .expect("put should succeed");
            }
        })
    };
    deleter.join().unwrap();
    writer.join().unwrap();

    let keys = store.list("carol", "sleep").unwrap();
    assert_eq!(keys.len(), 100);
    assert!(keys.iter().all(|k| {
        let n: u32 = k.identifier().parse().unwrap();
        n >= 100 || n % 2 == 1
    }));
}

#[test]
fn stress_concurrent_authentication() {
    let tmp = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditLog::open(tmp.path().join("audit.log")).unwrap());
    let config = VaultConfig::new(tmp.path());
    let registry = Arc::new(SessionRegistry::new(&config, Some(Arc::clone(&audit))));
    let hash = Arc::new(hash_password("correct").unwrap());

    let mut handles = Vec::new();
    for user in 0..8 {
        let registry = Arc::clone(&registry);
        let hash = Arc::clone(&hash);
        handles.push(thread::spawn(move || {
            let identity = format!("user{user}");
            let mut tokens = Vec::new();
            for _ in 0..3 {
                let result = registry.authenticate(&identity, "correct", &hash);
                assert!(result.success);
                tokens.push(result.token.unwrap());
            }
            tokens
        }));
    }

    let mut tokens = HashSet::new();
    for h in handles {
        for token in h.join().unwrap() {
            assert!(tokens.insert(token), "session tokens must be unique");
        }
    }
    assert_eq!(tokens.len(), 24);
    assert_eq!(registry.active_sessions(), 24);
    for token in &tokens {
        assert!(registry.verify_session(token).is_some());
    }
    assert_eq!(audit.verify_chain().unwrap(), 24);
}

#[test]
fn stress_reads_during_writes_after_index_loss() {
    for round in 0..10 {
        let tmp = tempfile::tempdir().unwrap();
        {
            let (_audit, store) = open_store(tmp.path());
            for i in 0..200 {
                store
                    .put(&format!("dave/vitals/old{i:03}"), b"old", &Metadata::new(), &KEY)
                    .unwrap();
            }
        }
        std::fs::remove_file(tmp.path().join("_index.json")).unwrap();

        let (_audit, store) = open_store(tmp.path());
        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();
        for thread_id in 0..8 {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                if thread_id % 2 == 0 {
                    for _ in 0..5 {
                        store
                            .query("dave", "vitals", &QueryFilter::all(), &KEY)
                            .expect("query should succeed");
                        store.list("dave", "vitals").expect("list should succeed");
                    }
                } else {
                    for i in 0..5 {
                        store
                            .put(
                                &format!("dave/vitals/new{thread_id}_{i}"),
                                b"new",
                                &Metadata::new(),
                                &KEY,
                            )
                            .expect("put should succeed");
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let keys: HashSet<String> = store
            .list("dave", "vitals")
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(keys.len(), 220, "round {round}");
        for thread_id in [1, 3, 5, 7] {
            for i in 0..5 {
                assert!(
                    keys.contains(&format!("dave/vitals/new{thread_id}_{i}")),
                    "round {round}: new{thread_id}_{i} missing"
                );
            }
        }
        assert_eq!(
            store
                .query("dave", "vitals", &QueryFilter::all(), &KEY)
                .unwrap()
                .len(),
            220
        );
        assert_eq!(PartitionIndex::load(tmp.path().join("_index.json")).len(), 220);
    }
}

#[test]
fn stress_parallel_wrong_passwords_rate_limited() {
    let tmp = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditLog::open(tmp.path().join("audit.log")).unwrap());
    let config = VaultConfig::new(tmp.path());
    let registry = Arc::new(SessionRegistry::new(&config, Some(Arc::clone(&audit))));
    let hash = Arc::new(hash_password("correct").unwrap());
    let barrier = Arc::new(Barrier::new(32));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let registry = Arc::clone(&registry);
        let hash = Arc::clone(&hash);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            registry.authenticate("mallory", "guess", &hash).reason
        }));
    }
    let reasons: Vec<AuthReason> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let checked = reasons
        .iter()
        .filter(|r| **r == AuthReason::InvalidCredentials)
        .count();
    let limited = reasons
        .iter()
        .filter(|r| **r == AuthReason::RateLimited)
        .count();
    assert_eq!(checked, config.max_failed_attempts);
    assert_eq!(limited, 32 - config.max_failed_attempts);
    assert_eq!(registry.failed_attempts("mallory"), config.max_failed_attempts);

    // The correct password is refused too until the window passes.
    assert_eq!(
        registry.authenticate("mallory", "correct", &hash).reason,
        AuthReason::RateLimited
    );
    assert_eq!(audit.entries_for("mallory").unwrap().len(), 33);
    assert_eq!(audit.verify_chain().unwrap(), 33);
}
