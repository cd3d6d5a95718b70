use super::{Cache, CacheService, NO_TTL};
use super::backend::CacheBackend;
use crate::errors::CacheError;
use std::sync::Arc;
use std::time::Duration;

fn local_cache(namespace: &str) -> CacheService {
    CacheService::new(None, namespace.to_string(), None)
}

#[tokio::test]
async fn local_backend_get_returns_stored_bytes() {
    let cache = local_cache("configuration");

    cache
        .set_bytes("hello", br#"{"ttl": "10s"}"#, NO_TTL)
        .await
        .expect("set should succeed");

    let value = cache.get_bytes("hello").await.expect("get should succeed");
    assert_eq!(value, br#"{"ttl": "10s"}"#.to_vec());
}

#[tokio::test]
async fn miss_is_reported_as_not_found() {
    let cache = local_cache("configuration");

    let err = cache
        .get_bytes("missing")
        .await
        .expect_err("missing key should not resolve");
    assert!(matches!(err, CacheError::NotFound(ref key) if key == "missing"));
}

#[tokio::test]
async fn ttl_expires_entries_and_no_ttl_keeps_them() {
    let cache = local_cache("configuration");

    cache
        .set_bytes("short", b"v1", Some(Duration::from_millis(30)))
        .await
        .expect("set should succeed");
    cache
        .set_bytes("forever", b"v2", NO_TTL)
        .await
        .expect("set should succeed");

    assert_eq!(cache.get_bytes("short").await.unwrap(), b"v1".to_vec());

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(
        cache.get_bytes("short").await,
        Err(CacheError::NotFound(_))
    ));
    assert_eq!(cache.get_bytes("forever").await.unwrap(), b"v2".to_vec());
}

#[tokio::test]
async fn set_if_absent_does_not_overwrite() {
    let cache = local_cache("configuration");

    let first = cache
        .set_bytes_if_absent("forbidden-hostnames", b"[]", NO_TTL)
        .await
        .expect("set_nx should succeed");
    let second = cache
        .set_bytes_if_absent("forbidden-hostnames", b"[\"evil.example\"]", NO_TTL)
        .await
        .expect("set_nx should succeed");

    assert!(first);
    assert!(!second);
    assert_eq!(
        cache.get_bytes("forbidden-hostnames").await.unwrap(),
        b"[]".to_vec()
    );
}

#[tokio::test]
async fn keys_are_namespaced() {
    let cache = local_cache("configuration");
    cache.set("k", b"v", NO_TTL).await.unwrap();

    assert!(cache.backend.get("configuration:k").await.unwrap().is_some());
    assert!(cache.backend.get("k").await.unwrap().is_none());

    cache.del("k").await.unwrap();
    assert!(cache.get("k").await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_writers_are_safe() {
    let cache = Arc::new(local_cache("configuration"));

    let mut handles = Vec::new();
    for i in 0..16 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            let key = format!("key-{i}");
            cache.set_bytes(&key, key.as_bytes(), NO_TTL).await.unwrap();
            cache.get_bytes(&key).await.unwrap()
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let value = handle.await.unwrap();
        assert_eq!(value, format!("key-{i}").into_bytes());
    }
}

#[test]
fn stored_values_round_trip_whatever_their_first_bytes() {
    use super::redis_backend::{decode_value, encode_value};

    let zstd_lookalike = [0x28, 0xb5, 0x2f, 0xfd, 0x00];
    let stored = encode_value(&zstd_lookalike, 4096).unwrap();
    assert_eq!(stored.len(), zstd_lookalike.len() + 1);
    assert_eq!(decode_value(&stored).unwrap(), zstd_lookalike.to_vec());

    let large = vec![0x28u8; 10_000];
    let stored = encode_value(&large, 4096).unwrap();
    assert!(stored.len() < large.len());
    assert_eq!(decode_value(&stored).unwrap(), large);

    assert_eq!(decode_value(&encode_value(b"", 4096).unwrap()).unwrap(), Vec::<u8>::new());
}

#[test]
fn unknown_value_tag_is_an_error() {
    use super::redis_backend::decode_value;

    assert!(decode_value(&[0x7f, b'x']).is_err());
}
