//! Queued operations survive a restart when the cache sits on a file store.

use localsync_core::{Entity, JsonStoreExt, LocalCache, OperationConfig, Source};
use localsync_testkit::prelude::*;
use serde_json::Value;

#[test]
fn queued_create_survives_restart() {
    let dir = TempStoreDir::new();
    let server = FauxServer::with_books();
    let mut book = new_book("Bel-Ami", "Guy de Maupassant");

    server.enable(false);
    {
        let cache = LocalCache::with_config(dir.open(), &server, test_config());
        let outcome = cache.save(&mut book, None, OperationConfig::save()).unwrap();
        assert_eq!(outcome.source, Source::LocalFallback);
        assert_eq!(cache.dirty_queue().total_pending().unwrap(), 1);
    }

    server.enable(true);
    let cache = LocalCache::with_config(dir.open(), &server, test_config());
    assert_eq!(cache.pending_for(&book).unwrap().len(), 1);

    let outcome = cache.save(&mut book, None, OperationConfig::save()).unwrap();
    assert_eq!(outcome.drain.unwrap().cleared.len(), 1);
    assert_eq!(cache.dirty_queue().total_pending().unwrap(), 0);

    let key = cache.storage_key(&mut book);
    assert_eq!(key.as_str(), "book/11");
    assert_eq!(
        cache.store().get_json::<Value>(key.as_str()).unwrap(),
        Some(Value::Object(book.snapshot()))
    );
    assert_eq!(server.len("book"), 11);
}

#[test]
fn compacted_store_keeps_cache_contents() {
    let dir = TempStoreDir::new();
    let server = FauxServer::with_books();

    {
        let cache = LocalCache::with_config(dir.open(), &server, test_config());
        for id in 1..=10 {
            let mut book = book_with_id(id);
            cache.fetch(&mut book, OperationConfig::fetch()).unwrap();
            cache.fetch(&mut book, OperationConfig::fetch()).unwrap();
        }
        let reclaimed = cache.store().compact().unwrap();
        assert!(reclaimed > 0);
        assert_eq!(cache.store().dead_records(), 0);
    }

    let cache = LocalCache::with_config(dir.open(), &server, test_config());
    let mut book = book_with_id(5);
    cache
        .fetch(&mut book, OperationConfig::fetch().remote(false))
        .unwrap();
    assert_eq!(book.get("author").unwrap(), "Ernest Hemingway");
}
