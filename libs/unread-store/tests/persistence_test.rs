use chrono::{Duration, Utc};
use std::sync::Arc;
use unread_store::{FileStore, KeyValueStore, UnreadConfig, UnreadStore};

#[test]
fn test_counts_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();

    let before = {
        let store = UnreadStore::load(Arc::new(FileStore::new(dir.path())), "chat-unread-storage");
        store.add_unread_message(42, now);
        store.add_unread_message(42, now + Duration::seconds(5));
        store.add_unread_message(7, now);
        store.add_unread_message(9, now);
        store.clear_unread(9);
        store.entries()
    };

    let reopened = UnreadStore::load(Arc::new(FileStore::new(dir.path())), "chat-unread-storage");
    assert_eq!(reopened.entries(), before);
    assert_eq!(reopened.get_unread_count(42), 2);
    assert_eq!(reopened.get_unread_count(9), 0);
    assert_eq!(reopened.get_total_unread(), 3);
}

#[test]
fn test_snapshot_roundtrip_preserves_entries() {
    let config = UnreadConfig::default();
    let store = unread_store::open(&config);
    let now = Utc::now();
    for (id, n) in [("a", 1), ("b", 4), ("c", 2)] {
        for _ in 0..n {
            store.add_unread_message(id, now);
        }
    }

    let snapshot = store.to_snapshot();
    let rebuilt = UnreadStore::from_snapshot(snapshot.clone());
    assert_eq!(rebuilt.len(), 3);
    for (id, entry) in snapshot {
        assert_eq!(rebuilt.get(&id), Some(&entry));
    }
}

#[test]
fn test_corrupt_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let backend = FileStore::new(dir.path());
    backend.set("chat-unread-storage", "{\"truncated\": ").unwrap();

    let store = UnreadStore::load(Arc::new(backend), "chat-unread-storage");
    assert_eq!(store.get_total_unread(), 0);

    // The next mutation overwrites the corrupt snapshot.
    store.add_unread_message(1, Utc::now());
    let reopened = UnreadStore::load(Arc::new(FileStore::new(dir.path())), "chat-unread-storage");
    assert_eq!(reopened.get_unread_count(1), 1);
}
