//! Resilience tests: corrupted records, tampered ciphertext, damaged index
//! and audit files.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use healthvault::storage::record::Metadata;
use healthvault::{AuditLog, EncryptedStore, QueryFilter, VaultError};

const KEY: [u8; 32] = [9u8; 32];

fn open_store(root: &std::path::Path) -> (Arc<AuditLog>, EncryptedStore) {
    let audit = Arc::new(AuditLog::open(root.join("audit.log")).unwrap());
    let store = EncryptedStore::open(root, Arc::clone(&audit)).unwrap();
    (audit, store)
}

fn edit_record(path: &std::path::Path, field: &[&str], edit: impl FnOnce(&mut Vec<u8>)) {
    let mut value: serde_json::Value =
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
    let mut slot = &mut value;
    for name in field {
        slot = &mut slot[*name];
    }
    let mut bytes = STANDARD.decode(slot.as_str().unwrap()).unwrap();
    edit(&mut bytes);
    *slot = serde_json::Value::String(STANDARD.encode(&bytes));
    std::fs::write(path, serde_json::to_vec(&value).unwrap()).unwrap();
}

#[test]
fn resilience_tampered_fields_detected() {
    for field in [
        &["ciphertext"][..],
        &["encryption", "nonce"][..],
        &["encryption", "auth_tag"][..],
    ] {
        let tmp = tempfile::tempdir().unwrap();
        let (_audit, store) = open_store(tmp.path());
        store
            .put("alice/vitals/1", b"hr=72 bp=120/80", &Metadata::new(), &KEY)
            .unwrap();

        edit_record(&tmp.path().join("alice/vitals/1.json"), field, |b| b[0] ^= 0x01);
        assert!(
            matches!(
                store.get("alice/vitals/1", &KEY),
                Err(VaultError::AuthenticationFailed)
            ),
            "tampered {field:?} must be detected"
        );
    }
}

#[test]
fn resilience_truncated_tag_detected() {
    let tmp = tempfile::tempdir().unwrap();
    let (_audit, store) = open_store(tmp.path());
    store
        .put("alice/vitals/1", b"hr=72", &Metadata::new(), &KEY)
        .unwrap();
    edit_record(
        &tmp.path().join("alice/vitals/1.json"),
        &["encryption", "auth_tag"],
        |b| b.truncate(8),
    );
    assert!(matches!(
        store.get("alice/vitals/1", &KEY),
        Err(VaultError::AuthenticationFailed)
    ));
}

#[test]
fn resilience_truncated_record_file() {
    let tmp = tempfile::tempdir().unwrap();
    let (_audit, store) = open_store(tmp.path());
    store
        .put("alice/vitals/1", b"hr=72", &Metadata::new(), &KEY)
        .unwrap();
    store
        .put("alice/vitals/2", b"hr=75", &Metadata::new(), &KEY)
        .unwrap();

    let path = tmp.path().join("alice/vitals/1.json");
    let data = std::fs::read(&path).unwrap();
    std::fs::write(&path, &data[..data.len() / 2]).unwrap();

    assert!(matches!(
        store.get("alice/vitals/1", &KEY),
        Err(VaultError::InvalidFileFormat(_))
    ));
    // The healthy record is still served.
    assert_eq!(
        store
            .query("alice", "vitals", &QueryFilter::all(), &KEY)
            .unwrap(),
        vec![b"hr=75".to_vec()]
    );
}

#[test]
fn resilience_garbage_index_falls_back_to_scan() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let (_audit, store) = open_store(tmp.path());
        store
            .put("alice/vitals/1", b"hr=72", &Metadata::new(), &KEY)
            .unwrap();
    }
    std::fs::write(tmp.path().join("_index.json"), b"\x00\x01garbage").unwrap();

    let (_audit, store) = open_store(tmp.path());
    assert_eq!(
        store
            .query("alice", "vitals", &QueryFilter::all(), &KEY)
            .unwrap(),
        vec![b"hr=72".to_vec()]
    );
}

#[test]
fn resilience_stray_files_ignored_by_scan() {
    let tmp = tempfile::tempdir().unwrap();
    let (_audit, store) = open_store(tmp.path());
    store
        .put("alice/vitals/1", b"hr=72", &Metadata::new(), &KEY)
        .unwrap();
    let dir = tmp.path().join("alice/vitals");
    std::fs::write(dir.join(".1.json.abc.tmp"), b"partial").unwrap();
    std::fs::write(dir.join("notes.txt"), b"not a record").unwrap();
    std::fs::remove_file(tmp.path().join("_index.json")).unwrap();

    let (_audit, store) = open_store(tmp.path());
    let keys = store.list("alice", "vitals").unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].identifier(), "1");
}

#[test]
fn resilience_audit_tampering_detected() {
    let tmp = tempfile::tempdir().unwrap();
    let (audit, store) = open_store(tmp.path());
    store
        .put("alice/vitals/1", b"hr=72", &Metadata::new(), &KEY)
        .unwrap();
    let _ = store.get("alice/vitals/1", &[0u8; 32]);
    store.get("alice/vitals/1", &KEY).unwrap();
    assert_eq!(audit.verify_chain().unwrap(), 3);

    // Rewrite the failed retrieve as a success.
    let path = tmp.path().join("audit.log");
    let text = std::fs::read_to_string(&path).unwrap();
    let forged = text.replacen("SUCCESS: false", "SUCCESS: true", 1);
    assert_ne!(text, forged);
    std::fs::write(&path, forged).unwrap();

    let reopened = AuditLog::open(&path).unwrap();
    assert!(matches!(
        reopened.verify_chain(),
        Err(VaultError::AuditChainBroken { line: 2 })
    ));
}
