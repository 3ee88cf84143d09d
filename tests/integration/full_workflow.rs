//! Integration test: full end-to-end workflow.
//!
//! Tests the complete lifecycle:
//! 1. Open a vault and register users
//! 2. Unlock and store records in several partitions
//! 3. Query with filters, across a restart
//! 4. Enforce partition isolation and owner-only deletes
//! 5. Rate-limit repeated bad passwords
//! 6. Verify the audit trail

use std::sync::Arc;
use std::time::Duration;

use healthvault::storage::record::Metadata;
use healthvault::time::{rfc3339_to_micros, ManualClock};
use healthvault::{QueryFilter, Vault, VaultConfig, VaultError};

fn meta(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn full_workflow_register_to_audit() {
    let tmp = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let config = VaultConfig::new(tmp.path());

    // ── Step 1: Register users ──────────────────────────────────────────
    let vault = Vault::open_with_clock(config.clone(), clock.clone()).unwrap();
    vault.register("alice", "alice-pw").unwrap();
    vault.register("bob", "bob-pw").unwrap();
    assert!(matches!(
        vault.register("alice", "again"),
        Err(VaultError::AlreadyExists(_))
    ));

    // ── Step 2: Store records ───────────────────────────────────────────
    let (alice, alice_key) = vault.unlock("alice", "alice-pw").unwrap();
    let (_bob, bob_key) = vault.unlock("bob", "bob-pw").unwrap();
    assert_ne!(alice_key, bob_key);

    let store = vault.store();
    store
        .put(
            "alice/vitals/morning",
            b"hr=64",
            &meta(&[("timestamp", "2024-01-01T07:00:00+00:00"), ("entry_type", "vital")]),
            alice_key.as_slice(),
        )
        .unwrap();
    store
        .put(
            "alice/vitals/evening",
            b"hr=80",
            &meta(&[("timestamp", "2024-01-01T21:00:00+00:00"), ("entry_type", "vital")]),
            alice_key.as_slice(),
        )
        .unwrap();
    let generated = store
        .insert(
            "alice",
            "wellness/symptoms",
            b"headache",
            &meta(&[("entry_type", "symptom")]),
            alice_key.as_slice(),
        )
        .unwrap();
    store
        .put("bob/vitals/1", b"hr=55", &Metadata::new(), bob_key.as_slice())
        .unwrap();

    // Nothing on disk is plaintext.
    let raw = std::fs::read_to_string(tmp.path().join("alice/vitals/morning.json")).unwrap();
    assert!(!raw.contains("hr=64"));

    // ── Step 3: Query, then again after a restart ───────────────────────
    let noon = rfc3339_to_micros("2024-01-01T12:00:00Z").unwrap();
    let afternoon = store
        .query("alice", "vitals", &QueryFilter::all().since(noon), alice_key.as_slice())
        .unwrap();
    assert_eq!(afternoon, vec![b"hr=80".to_vec()]);

    drop(vault);
    let vault = Vault::open_with_clock(config.clone(), clock.clone()).unwrap();
    let (_, alice_key) = vault.unlock("alice", "alice-pw").unwrap();
    let vitals = vault
        .store()
        .query("alice", "vitals", &QueryFilter::all(), alice_key.as_slice())
        .unwrap();
    assert_eq!(vitals, vec![b"hr=64".to_vec(), b"hr=80".to_vec()]);
    assert_eq!(
        vault
            .store()
            .get(&generated.to_string(), alice_key.as_slice())
            .unwrap()
            .as_deref(),
        Some(&b"headache"[..])
    );

    // ── Step 4: Isolation and deletes ───────────────────────────────────
    assert!(matches!(
        vault.store().get("bob/vitals/1", alice_key.as_slice()),
        Err(VaultError::AuthenticationFailed)
    ));
    assert!(vault
        .store()
        .query("bob", "vitals", &QueryFilter::all(), alice_key.as_slice())
        .unwrap()
        .is_empty());

    // The session from before the restart is gone with the old process.
    assert!(vault.require_reauth("alice", &alice.token).is_err());
    let alice = vault.login("alice", "alice-pw").unwrap();
    assert!(matches!(
        vault.delete_with_session("bob/vitals/1", &alice.token),
        Err(VaultError::Unauthorized { .. })
    ));
    vault
        .delete_with_session("alice/vitals/morning", &alice.token)
        .unwrap();
    assert_eq!(
        vault
            .store()
            .get("alice/vitals/morning", alice_key.as_slice())
            .unwrap(),
        None
    );

    // ── Step 5: Rate limiting ───────────────────────────────────────────
    for _ in 0..5 {
        assert!(matches!(
            vault.login("bob", "guess"),
            Err(VaultError::InvalidCredentials)
        ));
    }
    assert!(matches!(
        vault.login("bob", "bob-pw"),
        Err(VaultError::RateLimited(_))
    ));
    clock.advance(Duration::from_secs(15 * 60 + 1));
    vault.login("bob", "bob-pw").unwrap();

    // ── Step 6: Audit trail ─────────────────────────────────────────────
    let audit = vault.audit();
    let total = audit.verify_chain().unwrap();
    assert_eq!(total, audit.entries().unwrap().len());

    let alice_ops: Vec<String> = audit
        .entries_for("alice")
        .unwrap()
        .into_iter()
        .map(|e| e.operation)
        .collect();
    assert!(alice_ops.contains(&"store_wellness/symptoms".to_string()));
    assert!(alice_ops.contains(&"unauthorized_delete_bob/vitals/1".to_string()));
    assert!(alice_ops.contains(&"delete_vitals".to_string()));

    let bob_failures = audit
        .entries_for("bob")
        .unwrap()
        .into_iter()
        .filter(|e| e.operation == "authentication" && !e.success)
        .count();
    assert_eq!(bob_failures, 6);
}

#[test]
fn full_workflow_index_recovery() {
    let tmp = tempfile::tempdir().unwrap();
    let vault = Vault::open(VaultConfig::new(tmp.path())).unwrap();
    vault.register("carol", "pw").unwrap();
    let (_, key) = vault.unlock("carol", "pw").unwrap();

    for i in 0..10 {
        vault
            .store()
            .put(
                &format!("carol/sleep/night{i:02}"),
                format!("hours={}", 6 + i % 3).as_bytes(),
                &Metadata::new(),
                key.as_slice(),
            )
            .unwrap();
    }
    drop(vault);

    // Lose the index entirely.
    std::fs::remove_file(tmp.path().join("_index.json")).unwrap();
    let vault = Vault::open(VaultConfig::new(tmp.path())).unwrap();
    let (_, key) = vault.unlock("carol", "pw").unwrap();
    let nights = vault
        .store()
        .query("carol", "sleep", &QueryFilter::all(), key.as_slice())
        .unwrap();
    assert_eq!(nights.len(), 10);
    assert_eq!(nights[0], b"hours=6");

    // A full rebuild agrees with the scan.
    assert_eq!(vault.store().rebuild_index().unwrap(), 10);
}
