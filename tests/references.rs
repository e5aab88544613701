use std::{collections::BTreeMap, path::Path};

use futures::TryStreamExt;
use serde_json::json;
use tempfile::TempDir;
use zarrs_gateway::{
    chunk_store::{ChunkStoreCreateError, ChunkStoreError},
    storage::StoreKey,
    ChunkStore, StoreOptions,
};

fn key(key: &str) -> StoreKey {
    StoreKey::new(key).unwrap()
}

/// Write a version 1 manifest referring to files in `dir` through a template.
fn write_v1(dir: &Path) -> String {
    std::fs::write(dir.join("a.nc"), b"0123456789").unwrap();
    std::fs::write(dir.join("b.nc"), b"abcdef").unwrap();
    let manifest = json!({
        "version": 1,
        "templates": {"root": dir.to_str().unwrap()},
        "refs": {
            ".zgroup": {"zarr_format": 2},
            "x/.zarray": "{\"shape\": [4], \"fill_value\": NaN}",
            "x/0": ["{{root}}/a.nc", 2, 4],
            "x/1": ["{{root}}/b.nc"],
            "x/2": "base64:AQID",
            "x/3": ["{{root}}/gone.nc", 0, 4]
        }
    });
    let path = dir.join("refs.json");
    std::fs::write(&path, serde_json::to_vec(&manifest).unwrap()).unwrap();
    format!("reference::{}", path.display())
}

#[test]
fn open_local_references() {
    let dir = TempDir::new().unwrap();
    let source = write_v1(dir.path());
    let store = ChunkStore::open(&source, StoreOptions::default()).unwrap();
    assert_eq!(store.source(), source);
    assert_eq!(store.manifest().len(), 6);
    assert!(!store.is_async());
    assert!(!store.is_tape());

    assert_eq!(store.get(&key("x/0")).unwrap().as_ref(), b"2345");
    assert_eq!(store.get(&key("x/1")).unwrap().as_ref(), b"abcdef");
    assert_eq!(store.get(&key("x/2")).unwrap().as_ref(), &[1, 2, 3]);
    assert_eq!(
        store.get(&key(".zgroup")).unwrap().as_ref(),
        br#"{"zarr_format":2}"#
    );
    assert!(matches!(
        store.get(&key("x/3")),
        Err(ChunkStoreError::NotFound(_))
    ));
    assert!(store.get(&key("x/4")).unwrap_err().is_not_found());
}

#[tokio::test]
async fn fetch_local_references() {
    let dir = TempDir::new().unwrap();
    let source = write_v1(dir.path());
    let options = StoreOptions {
        lazy: true,
        cache_size: 64,
        ..StoreOptions::default()
    };
    let store = ChunkStore::open(&source, options).unwrap().to_async();
    assert!(store.is_async());

    assert_eq!(store.fetch_async(&key("x/0"), None).await.unwrap().as_ref(), b"2345");
    assert_eq!(store.fetch_async(&key("x/1"), Some(1)).await.unwrap().as_ref(), b"a");
    // A range hint beyond the value is clamped
    assert_eq!(store.fetch_async(&key("x/2"), Some(8)).await.unwrap().as_ref(), &[1, 2, 3]);

    let parts: Vec<_> = store
        .fetch_stream(&key("x/1"))
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(parts.concat(), b"abcdef");

    assert!(store.fetch_stream(&key("x/3")).await.is_err());
    store.clear_directory_cache();
}

#[test]
fn open_errors() {
    let dir = TempDir::new().unwrap();
    let source = write_v1(dir.path());

    assert!(matches!(
        ChunkStore::open("reference::/does/not/exist.json", StoreOptions::default()),
        Err(ChunkStoreCreateError::ReferenceError(_))
    ));

    let options = StoreOptions {
        remote_protocol: Some("ftp".to_string()),
        ..StoreOptions::default()
    };
    assert!(matches!(
        ChunkStore::open(&source, options),
        Err(ChunkStoreCreateError::UnsupportedProtocol(protocol)) if protocol == "ftp"
    ));

    let options = StoreOptions {
        remote_protocol: Some("slk".to_string()),
        ..StoreOptions::default()
    };
    assert!(matches!(
        ChunkStore::open(&source, options),
        Err(ChunkStoreCreateError::MissingRemoteOption("slk_cache"))
    ));

    // Local paths have no object store origin
    let options = StoreOptions {
        remote_protocol: Some("s3".to_string()),
        remote_options: BTreeMap::from([("region".to_string(), json!("eu-central-1"))]),
        ..StoreOptions::default()
    };
    assert!(matches!(
        ChunkStore::open(&source, options),
        Err(ChunkStoreCreateError::TargetOrigins(origins)) if origins.is_empty()
    ));
}

#[test]
fn open_object_references_with_mixed_origins() {
    let dir = TempDir::new().unwrap();
    let manifest = json!({
        "a/0": ["s3://bucket-a/a.nc", 0, 4],
        "a/1": ["s3://bucket-b/a.nc", 0, 4]
    });
    let path = dir.path().join("refs.json");
    std::fs::write(&path, serde_json::to_vec(&manifest).unwrap()).unwrap();
    let options = StoreOptions {
        remote_protocol: Some("s3".to_string()),
        ..StoreOptions::default()
    };
    let Err(ChunkStoreCreateError::TargetOrigins(origins)) =
        ChunkStore::open(path.to_str().unwrap(), options)
    else {
        panic!("expected mixed origins to be rejected");
    };
    assert_eq!(origins, vec!["s3://bucket-a", "s3://bucket-b"]);
}

#[test]
fn open_inline_references() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("inline.json");
    std::fs::write(
        &path,
        br#"{".zattrs": "{\"title\": \"inline\"}", "x/0": "base64:AAE="}"#,
    )
    .unwrap();
    let options = StoreOptions {
        remote_protocol: Some("memory".to_string()),
        ..StoreOptions::default()
    };
    let store = ChunkStore::open(path.to_str().unwrap(), options).unwrap();
    assert_eq!(store.get(&key("x/0")).unwrap().as_ref(), &[0, 1]);
    assert!(store.get(&key("x/1")).unwrap_err().is_not_found());
}
