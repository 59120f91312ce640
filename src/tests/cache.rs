use crate::cache::{cache_key, ResponseCache};
use crate::provider::{GenerationParams, LmResponse};

fn params() -> GenerationParams {
    GenerationParams::default()
}

fn key(prompt: &str, p: &GenerationParams) -> String {
    cache_key("stub", "stub-v1", "approx", "complete", prompt, p)
}

#[test]
fn set_then_get_within_ttl() {
    let cache = ResponseCache::memory_only(64, 3600);
    let k = key("hello", &params());

    assert!(cache.get(&k).is_none());
    cache.set(&k, LmResponse::text("world"));
    assert_eq!(cache.get(&k).unwrap().text, "world");
}

#[test]
fn expired_entries_miss_and_are_deleted_on_access() {
    let cache = ResponseCache::memory_only(64, 3600);
    let k = key("hello", &params());

    // TTL of zero expires immediately.
    cache.set_with_ttl(&k, LmResponse::text("world"), 0);
    assert!(cache.get(&k).is_none());
    // Still gone on the second read.
    assert!(cache.get(&k).is_none());
}

#[test]
fn key_covers_the_full_parameter_bundle() {
    let base = params();
    let mut hotter = params();
    hotter.temperature = 0.9;
    let mut seeded = params();
    seeded.seed = Some(7);
    let mut stopped = params();
    stopped.stop = vec!["\n".to_string()];

    let k0 = key("same prompt", &base);
    assert_ne!(k0, key("same prompt", &hotter));
    assert_ne!(k0, key("same prompt", &seeded));
    assert_ne!(k0, key("same prompt", &stopped));
    assert_ne!(k0, key("other prompt", &base));
    // Tokenizer identity is part of the bundle.
    assert_ne!(
        k0,
        cache_key("stub", "stub-v1", "cl100k_base", "complete", "same prompt", &base)
    );
    // Same bundle, same key.
    assert_eq!(k0, key("same prompt", &base));
}

#[test]
fn disabled_cache_never_hits() {
    let cache = ResponseCache::disabled();
    let k = key("hello", &params());
    cache.set(&k, LmResponse::text("world"));
    assert!(cache.get(&k).is_none());
}

#[test]
fn memory_tier_evicts_least_recently_used() {
    // One shard per key prefix; flood far past the cap and confirm the
    // cache stays bounded while recent entries survive.
    let cache = ResponseCache::memory_only(16, 3600);
    let keys: Vec<String> = (0..256).map(|i| key(&format!("prompt {i}"), &params())).collect();
    for (i, k) in keys.iter().enumerate() {
        cache.set(k, LmResponse::text(format!("response {i}")));
    }
    let hits = keys.iter().filter(|k| cache.get(k).is_some()).count();
    assert!(hits <= 16, "expected at most 16 retained entries, got {hits}");
    // The most recently written key in its shard is retained.
    assert!(cache.get(keys.last().unwrap()).is_some());
}

#[test]
fn disk_tier_persists_across_cache_instances() {
    let dir = tempfile::tempdir().unwrap();
    let k = key("durable", &params());

    {
        let cache = ResponseCache::new(true, 64, 3600, Some(dir.path().to_path_buf()));
        cache.set(&k, LmResponse::text("persisted"));
    }

    // A fresh instance with a cold memory tier promotes from disk.
    let cache = ResponseCache::new(true, 64, 3600, Some(dir.path().to_path_buf()));
    assert_eq!(cache.get(&k).unwrap().text, "persisted");
}

#[test]
fn disk_entries_are_sharded_by_key_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ResponseCache::new(true, 64, 3600, Some(dir.path().to_path_buf()));
    let k = key("sharded", &params());
    cache.set(&k, LmResponse::text("x"));

    let shard_dir = dir.path().join(&k[..2]);
    assert!(shard_dir.join(format!("{k}.json")).exists());
}

#[test]
fn clear_memory_keeps_the_disk_tier() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ResponseCache::new(true, 64, 3600, Some(dir.path().to_path_buf()));
    let k = key("kept", &params());
    cache.set(&k, LmResponse::text("x"));

    cache.clear_memory();
    assert!(cache.get(&k).is_some(), "disk tier should backfill after a memory clear");
}
