//! Full integration tests exercising remote sync, cache and notification together.

use confcenter::core::Scheduler;
use confcenter::prelude::*;
use confcenter::store::{MemoryStore, publish, remove};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const BASE: &str = "/cms/config/db.ini";

fn identity() -> ProcessIdentity {
    ProcessIdentity::named("orders")
        .with_profile("production")
        .with_ip("10.0.0.7")
        .with_port(8080)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}

fn counter(doc: &Arc<Document>) -> (Arc<AtomicUsize>, SubscriptionHandle) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = Arc::clone(&count);
    let handle = doc.subscribe(
        move |_: &Document| {
            inner.fetch_add(1, Ordering::SeqCst);
        },
        false,
    );
    (count, handle)
}

#[test]
fn test_override_lifecycle() {
    let store = Arc::new(MemoryStore::new());
    publish(store.as_ref(), BASE, "orders", b"pool.size=10").unwrap();

    let registry = ConfigRegistry::builder()
        .with_identity(identity())
        .with_store(store.clone())
        .build()
        .unwrap();
    let db = registry.get_config("db.ini");
    let (count, _handle) = counter(&db);
    assert_eq!(db.get_int("pool.size", 0), 10);

    // more specific overrides take over as they appear
    publish(store.as_ref(), BASE, "production", b"pool.size=20").unwrap();
    assert_eq!(db.get_int("pool.size", 0), 20);
    publish(store.as_ref(), BASE, "10.0.0.7:8080", b"pool.size=40").unwrap();
    assert_eq!(db.get_int("pool.size", 0), 40);

    // and hand back when removed
    remove(store.as_ref(), &format!("{BASE}/10.0.0.7:8080")).unwrap();
    assert_eq!(db.get_int("pool.size", 0), 20);
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn test_session_loss_and_reconnect() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    publish(store.as_ref(), BASE, "production", b"a=1").unwrap();
    let registry = ConfigRegistry::builder()
        .with_identity(identity())
        .with_store(store.clone())
        .build()
        .unwrap();
    let db = registry.get_config("db.ini");
    let (count, _handle) = counter(&db);

    store.expire_session();
    assert_eq!(db.get_int("a", 0), 1);
    store.reconnect();
    assert_eq!(count.load(Ordering::SeqCst), 0);

    publish(store.as_ref(), BASE, "production", b"a=2").unwrap();
    assert_eq!(db.get_int("a", 0), 2);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cache_survives_restart_with_empty_store() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let cache_dir = temp_dir.path().join("cache");

    {
        let store = Arc::new(MemoryStore::new());
        publish(store.as_ref(), BASE, "production", b"pool.size=20").unwrap();
        let registry = ConfigRegistry::builder()
            .with_identity(identity())
            .with_store(store)
            .with_cache_dir(&cache_dir)
            .build()
            .unwrap();
        assert_eq!(registry.get_config("db.ini").get_int("pool.size", 0), 20);
    }
    assert_eq!(fs::read(cache_dir.join("db.ini")).unwrap(), b"pool.size=20");

    // a fresh process against a store that has lost its data
    let registry = ConfigRegistry::builder()
        .with_identity(identity())
        .with_store(Arc::new(MemoryStore::new()))
        .with_cache_dir(&cache_dir)
        .with_sync_delay(Duration::from_millis(50), Duration::ZERO)
        .build()
        .unwrap();
    let db = registry.get_config("db.ini");
    assert_eq!(db.get_int("pool.size", 0), 20);

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(db.get_int("pool.size", 0), 20);
    assert_eq!(fs::read(cache_dir.join("db.ini")).unwrap(), b"pool.size=20");
}

#[test]
fn test_cached_document_catches_up_after_delay() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("db.ini"), "pool.size=5").unwrap();

    let store = Arc::new(MemoryStore::new());
    publish(store.as_ref(), BASE, "production", b"pool.size=20").unwrap();
    let registry = ConfigRegistry::builder()
        .with_identity(identity())
        .with_store(store.clone())
        .with_cache_dir(temp_dir.path())
        .with_sync_delay(Duration::from_millis(50), Duration::from_millis(20))
        .build()
        .unwrap();

    let db = registry.get_config("db.ini");
    assert_eq!(db.get_int("pool.size", 0), 5);
    assert!(wait_for(|| db.get_int("pool.size", 0) == 20));
    assert!(wait_for(|| {
        fs::read(temp_dir.path().join("db.ini")).unwrap() == b"pool.size=20"
    }));

    publish(store.as_ref(), BASE, "production", b"pool.size=30").unwrap();
    assert_eq!(db.get_int("pool.size", 0), 30);
}

#[test]
fn test_hand_edited_cache_reaches_listeners() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    publish(store.as_ref(), BASE, "production", b"a=1").unwrap();
    let registry = ConfigRegistry::builder()
        .with_identity(identity())
        .with_store(store)
        .with_cache_dir(temp_dir.path())
        .build()
        .unwrap();
    let db = registry.get_config("db.ini");
    let (count, _handle) = counter(&db);

    // let the watcher settle after the initial cache write
    std::thread::sleep(Duration::from_millis(400));
    fs::write(temp_dir.path().join("db.ini"), "a=9").unwrap();
    assert!(wait_for(|| db.get_int("a", 0) == 9));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shared_runtime_scheduler() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("db.ini"), "a=cached").unwrap();
    let store = Arc::new(MemoryStore::new());
    publish(store.as_ref(), BASE, "orders", b"a=remote").unwrap();

    let registry = ConfigRegistry::builder()
        .with_identity(identity())
        .with_store(store)
        .with_cache_dir(temp_dir.path())
        .with_scheduler(Arc::new(Scheduler::from_handle(
            tokio::runtime::Handle::current(),
        )))
        .with_sync_delay(Duration::from_millis(20), Duration::ZERO)
        .build()
        .unwrap();
    let db = registry.get_config("db.ini");
    assert_eq!(db.get("a").as_deref(), Some("cached"));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while db.get("a").as_deref() != Some("remote") && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(db.get("a").as_deref(), Some("remote"));
}

#[test]
fn test_dropped_subscription_stops_notifications() {
    let store = Arc::new(MemoryStore::new());
    publish(store.as_ref(), BASE, "production", b"a=1").unwrap();
    let registry = ConfigRegistry::builder()
        .with_identity(identity())
        .with_store(store.clone())
        .build()
        .unwrap();
    let db = registry.get_config("db.ini");
    let (count, handle) = counter(&db);

    publish(store.as_ref(), BASE, "production", b"a=2").unwrap();
    drop(handle);
    publish(store.as_ref(), BASE, "production", b"a=3").unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(db.get_int("a", 0), 3);
}

#[cfg(feature = "metrics")]
#[test]
fn test_registry_with_metrics_enabled_syncs() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    publish(store.as_ref(), BASE, "production", b"a=1").unwrap();

    let registry = ConfigRegistry::builder()
        .with_identity(identity())
        .with_store(store.clone())
        .with_cache_dir(temp_dir.path())
        .with_metrics(opentelemetry::global::meter("confcenter-test"))
        .build()
        .unwrap();
    let db = registry.get_config("db.ini");
    publish(store.as_ref(), BASE, "production", b"a=2").unwrap();
    assert_eq!(db.get_int("a", 0), 2);
}
