use std::path::Path;
use std::sync::Arc;
use virtauthn::ctap2::types::UserEntity;
use virtauthn::keys::SoftKeyProvider;
use virtauthn::store::CredentialStore;
use virtauthn::UserPresenceProof;

fn load(dir: &Path, key: [u8; 32]) -> CredentialStore {
    let provider = Arc::new(SoftKeyProvider::open(key, dir.join("keys")).unwrap());
    CredentialStore::load(key, dir.join("credentials"), provider).unwrap()
}

fn user(id: &[u8]) -> UserEntity {
    UserEntity {
        id: id.to_vec(),
        name: Some("alice".into()),
        display_name: Some("Alice".into()),
    }
}

#[test]
fn test_store_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let key = [0xabu8; 32];
    let proof = UserPresenceProof::test_only();

    let (cred_id, public_key) = {
        let mut store = load(dir.path(), key);
        store.create_credential("example.com", user(b"user1"), &proof).unwrap()
    };

    // Reload from disk
    let store = load(dir.path(), key);
    assert_eq!(store.credential_count(), 1);
    assert!(store.exists("example.com", &cred_id));

    let listed = store.list_credentials("example.com");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0, cred_id);
    assert_eq!(listed[0].1, user(b"user1"));
    assert_eq!(store.public_key("example.com", &cred_id).unwrap(), public_key);
    assert_eq!(store.sign_count("example.com", &cred_id).unwrap(), 0);
}

#[test]
fn test_counter_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let key = [0x12u8; 32];
    let proof = UserPresenceProof::test_only();

    let cred_id = {
        let mut store = load(dir.path(), key);
        let (cred_id, _) = store.create_credential("example.com", user(b"u"), &proof).unwrap();
        for _ in 0..3 {
            store.sign("example.com", &cred_id, b"msg", &proof).unwrap();
        }
        cred_id
    };

    let mut store = load(dir.path(), key);
    assert_eq!(store.sign_count("example.com", &cred_id).unwrap(), 3);
    // The key survives too
    store.sign("example.com", &cred_id, b"msg", &proof).unwrap();
    assert_eq!(store.sign_count("example.com", &cred_id).unwrap(), 4);
}

#[test]
fn test_store_index() {
    let dir = tempfile::tempdir().unwrap();
    let key = [0xcd_u8; 32];
    let proof = UserPresenceProof::test_only();

    let mut store = load(dir.path(), key);
    let (first, _) = store.create_credential("rp.example", user(b"user1"), &proof).unwrap();
    let (second, _) = store.create_credential("rp.example", user(b"user2"), &proof).unwrap();
    assert_eq!(store.credential_count(), 2);
    drop(store);

    let store = load(dir.path(), key);
    let results = store.list_credentials("rp.example");
    // Most recent first, also after reload
    assert_eq!(results.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![second, first]);
}

#[test]
fn test_store_remove() {
    let dir = tempfile::tempdir().unwrap();
    let key = [0xef_u8; 32];

    let mut store = load(dir.path(), key);
    let (cred_id, _) = store
        .create_credential("remove.example", user(b"user"), &UserPresenceProof::test_only())
        .unwrap();
    assert_eq!(store.credential_count(), 1);

    let removed = store.remove(&cred_id).unwrap();
    assert!(removed);
    assert_eq!(store.credential_count(), 0);
    assert!(!store.exists("remove.example", &cred_id));

    // Removing again returns false
    let removed2 = store.remove(&cred_id).unwrap();
    assert!(!removed2);

    // Disk file should be gone
    let store2 = load(dir.path(), key);
    assert_eq!(store2.credential_count(), 0);
}

#[test]
fn test_store_wrong_key_skips_file() {
    // Write with key A, reload with key B: the AES-GCM tag check fails so the file is skipped.
    let dir = tempfile::tempdir().unwrap();
    let key_a = [0x11u8; 32];
    let key_b = [0x22u8; 32];

    let mut store = load(dir.path(), key_a);
    store
        .create_credential("wrong-key.example", user(b"user"), &UserPresenceProof::test_only())
        .unwrap();
    drop(store);

    let store2 = load(dir.path(), key_b);
    assert_eq!(
        store2.credential_count(),
        0,
        "corrupt (wrong-key) file must be skipped"
    );
}

#[test]
fn test_store_skips_truncated_bin_file() {
    // A .bin file shorter than the 12-byte nonce prefix should be skipped.
    let dir = tempfile::tempdir().unwrap();
    let key = [0xAAu8; 32];

    let creds = dir.path().join("credentials");
    std::fs::create_dir_all(&creds).unwrap();
    std::fs::write(creds.join("deadbeef.bin"), b"short").unwrap();

    let store = load(dir.path(), key);
    assert_eq!(
        store.credential_count(),
        0,
        "truncated .bin file must be skipped"
    );
}

#[test]
fn test_store_skips_non_bin_files() {
    // Non-.bin files in the credentials directory must be ignored.
    let dir = tempfile::tempdir().unwrap();
    let key = [0xBBu8; 32];

    let creds = dir.path().join("credentials");
    std::fs::create_dir_all(&creds).unwrap();
    std::fs::write(creds.join("notes.txt"), b"ignore me").unwrap();
    std::fs::write(creds.join("backup.json"), b"{}").unwrap();

    let store = load(dir.path(), key);
    assert_eq!(
        store.credential_count(),
        0,
        "non-.bin files must be ignored"
    );
}

#[test]
fn test_store_corrupt_bin_file_does_not_affect_valid_ones() {
    // A corrupt file is skipped but valid credentials in the same directory still load.
    let dir = tempfile::tempdir().unwrap();
    let key = [0xCCu8; 32];

    let mut store = load(dir.path(), key);
    let (cred_id, _) = store
        .create_credential("good.example", user(b"user"), &UserPresenceProof::test_only())
        .unwrap();
    drop(store);

    // Drop a garbage .bin file alongside the valid one
    std::fs::write(dir.path().join("credentials").join("garbage.bin"), b"not encrypted").unwrap();

    let store2 = load(dir.path(), key);
    assert_eq!(
        store2.credential_count(),
        1,
        "valid credential must still load despite corrupt neighbour"
    );
    assert!(store2.exists("good.example", &cred_id));
}
