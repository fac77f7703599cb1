//! End-to-end tests of fetch runs against a mock blob server
//!
//! Each test drives a `Coordinator` over a temporary cache root and checks
//! both the run report and what ends up on disk.

use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime};

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use depmirror::app::records::RecordStore;
use depmirror::app::{
    CacheConfig, ClientConfig, Coordinator, CoordinatorConfig, DependencyEntry, EntryOutcome,
    Sha1Hash, TransferAction, VerificationOutcome, WorkerConfig,
};

fn blob(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn test_config(cache_root: &Path) -> CoordinatorConfig {
    let worker = WorkerConfig {
        worker_count: 2,
        max_retries: 2,
        retry_base_delay: Duration::from_millis(10),
        retry_max_delay: Duration::from_millis(50),
        chunk_size: 128,
        ..WorkerConfig::default()
    };
    let client = ClientConfig {
        request_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    };
    CoordinatorConfig::new(CacheConfig::with_cache_root(cache_root), client, worker)
}

fn entry_for(server: &MockServer, name: &str, content: &[u8]) -> DependencyEntry {
    DependencyEntry::new(
        Url::parse(&format!("{}/{}", server.uri(), name)).unwrap(),
        format!("blobs/{}", name),
        content.len() as u64,
        Sha1Hash::digest(content),
    )
}

async fn mount_body(server: &MockServer, name: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(format!("/{}", name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_new_entry_is_fetched_and_verified() {
    let server = MockServer::start().await;
    let content = blob(1000, 1);
    mount_body(&server, "a", content.clone()).await;

    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::new(test_config(dir.path())).unwrap();
    let report = coordinator
        .process(vec![entry_for(&server, "a", &content)], 2)
        .await
        .unwrap();

    assert_eq!(report.counts.new, 1);
    assert_eq!(report.counts.valid, 1);
    assert_eq!(report.counts.bytes_transferred, 1000);
    assert!(!report.has_failures());
    assert_eq!(report.entries[0].outcome, EntryOutcome::Valid);

    let final_path = dir.path().join("blobs/a");
    assert_eq!(std::fs::read(&final_path).unwrap(), content);
    assert!(!dir.path().join("blobs/a.partial").exists());

    let record = coordinator.store().get("blobs/a").unwrap().unwrap();
    assert_eq!(record.outcome, VerificationOutcome::Valid);
    assert_eq!(record.size, 1000);
}

#[tokio::test]
async fn test_partial_file_resumes_with_range_request() {
    let server = MockServer::start().await;
    let content = blob(1000, 2);
    Mock::given(method("GET"))
        .and(path("/a"))
        .and(header("range", "bytes=400-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 400-999/1000")
                .set_body_bytes(content[400..].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("blobs")).unwrap();
    std::fs::write(dir.path().join("blobs/a.partial"), &content[..400]).unwrap();

    let coordinator = Coordinator::new(test_config(dir.path())).unwrap();
    let report = coordinator
        .process(vec![entry_for(&server, "a", &content)], 1)
        .await
        .unwrap();

    let entry = &report.entries[0];
    assert_eq!(entry.action, TransferAction::Resume { offset: 400 });
    assert_eq!(entry.outcome, EntryOutcome::Valid);
    assert_eq!(entry.bytes_transferred, 600);
    assert_eq!(std::fs::read(dir.path().join("blobs/a")).unwrap(), content);
}

#[tokio::test]
async fn test_ignored_range_falls_back_to_full_download() {
    let server = MockServer::start().await;
    let content = blob(1000, 3);
    mount_body(&server, "a", content.clone()).await;

    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("blobs")).unwrap();
    std::fs::write(dir.path().join("blobs/a.partial"), vec![0xEE; 400]).unwrap();

    let coordinator = Coordinator::new(test_config(dir.path())).unwrap();
    let report = coordinator
        .process(vec![entry_for(&server, "a", &content)], 1)
        .await
        .unwrap();

    let entry = &report.entries[0];
    assert_eq!(entry.action, TransferAction::Redownload);
    assert_eq!(entry.outcome, EntryOutcome::RedownloadedValid);
    assert_eq!(std::fs::read(dir.path().join("blobs/a")).unwrap(), content);
}

#[tokio::test]
async fn test_oversized_response_is_truncated_to_expected_size() {
    let server = MockServer::start().await;
    let mut body = blob(1000, 4);
    let content = body.clone();
    body.extend_from_slice(&[0u8; 200]);
    mount_body(&server, "a", body).await;

    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::new(test_config(dir.path())).unwrap();
    let report = coordinator
        .process(vec![entry_for(&server, "a", &content)], 1)
        .await
        .unwrap();

    assert_eq!(report.entries[0].outcome, EntryOutcome::Valid);
    let on_disk = std::fs::read(dir.path().join("blobs/a")).unwrap();
    assert_eq!(on_disk.len(), 1000);
    assert_eq!(on_disk, content);
}

#[tokio::test]
async fn test_oversized_local_file_is_redownloaded() {
    let server = MockServer::start().await;
    let content = blob(1000, 9);
    mount_body(&server, "a", content.clone()).await;

    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("blobs")).unwrap();
    std::fs::write(dir.path().join("blobs/a"), blob(1500, 10)).unwrap();

    let coordinator = Coordinator::new(test_config(dir.path())).unwrap();
    let report = coordinator
        .process(vec![entry_for(&server, "a", &content)], 1)
        .await
        .unwrap();

    let entry = &report.entries[0];
    assert_eq!(entry.action, TransferAction::Redownload);
    assert_eq!(entry.outcome, EntryOutcome::RedownloadedValid);
    let on_disk = std::fs::read(dir.path().join("blobs/a")).unwrap();
    assert_eq!(on_disk.len(), 1000);
    assert_eq!(on_disk, content);
}

#[tokio::test]
async fn test_missing_blob_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::new(test_config(dir.path())).unwrap();
    let report = coordinator
        .process(vec![entry_for(&server, "gone", &blob(10, 5))], 1)
        .await
        .unwrap();

    let entry = &report.entries[0];
    assert_eq!(entry.outcome, EntryOutcome::DownloadFailed);
    assert_eq!(entry.attempts, 1);
    assert!(entry.error.is_some());
    assert_eq!(report.counts.errors, 1);
    assert!(report.has_failures());
    assert!(!dir.path().join("blobs/gone").exists());
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let server = MockServer::start().await;
    let content = blob(300, 6);
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_body(&server, "a", content.clone()).await;

    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::new(test_config(dir.path())).unwrap();
    let report = coordinator
        .process(vec![entry_for(&server, "a", &content)], 1)
        .await
        .unwrap();

    let entry = &report.entries[0];
    assert_eq!(entry.outcome, EntryOutcome::Valid);
    assert_eq!(entry.attempts, 3);
}

#[tokio::test]
async fn test_second_run_uses_records_without_network() {
    let server = MockServer::start().await;
    let first = blob(500, 7);
    let second = blob(700, 8);
    mount_body(&server, "a", first.clone()).await;
    mount_body(&server, "b", second.clone()).await;

    let dir = TempDir::new().unwrap();
    let entries = vec![
        entry_for(&server, "a", &first),
        entry_for(&server, "b", &second),
    ];

    let coordinator = Coordinator::new(test_config(dir.path())).unwrap();
    let report = coordinator.process(entries.clone(), 2).await.unwrap();
    assert_eq!(report.counts.valid, 2);

    server.reset().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let report = coordinator.process(entries, 2).await.unwrap();
    assert_eq!(report.counts.verify_only, 2);
    assert_eq!(report.counts.valid, 2);
    assert_eq!(report.counts.fast_path_hits, 2);
    assert_eq!(report.counts.bytes_transferred, 0);
}

#[tokio::test]
async fn test_wrong_content_is_a_hash_mismatch() {
    let server = MockServer::start().await;
    let expected = blob(256, 9);
    mount_body(&server, "a", blob(256, 10)).await;

    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::new(test_config(dir.path())).unwrap();
    let report = coordinator
        .process(vec![entry_for(&server, "a", &expected)], 1)
        .await
        .unwrap();

    assert_eq!(report.entries[0].outcome, EntryOutcome::HashMismatch);
    assert_eq!(report.counts.hash_mismatch, 1);
    assert!(report.has_failures());

    let record = coordinator.store().get("blobs/a").unwrap().unwrap();
    assert_eq!(record.outcome, VerificationOutcome::HashMismatch);
}

#[tokio::test]
async fn test_compressed_entry_is_stored_decompressed() {
    let server = MockServer::start().await;
    let content = blob(4096, 11);
    let packed = gzip(&content);
    mount_body(&server, "a.gz", packed.clone()).await;

    let dir = TempDir::new().unwrap();
    let entry = DependencyEntry::new(
        Url::parse(&format!("{}/a.gz", server.uri())).unwrap(),
        "blobs/a",
        content.len() as u64,
        Sha1Hash::digest(&content),
    )
    .with_compression(Some(packed.len() as u64));

    let coordinator = Coordinator::new(test_config(dir.path())).unwrap();
    let report = coordinator.process(vec![entry], 1).await.unwrap();

    assert_eq!(report.entries[0].outcome, EntryOutcome::Valid);
    assert_eq!(std::fs::read(dir.path().join("blobs/a")).unwrap(), content);
}

#[tokio::test]
async fn test_undecodable_compressed_entry_is_corrupt() {
    let server = MockServer::start().await;
    let garbage = blob(300, 12);
    mount_body(&server, "a.gz", garbage.clone()).await;

    let dir = TempDir::new().unwrap();
    let entry = DependencyEntry::new(
        Url::parse(&format!("{}/a.gz", server.uri())).unwrap(),
        "blobs/a",
        1000,
        Sha1Hash::digest(&blob(1000, 13)),
    )
    .with_compression(Some(garbage.len() as u64));

    let coordinator = Coordinator::new(test_config(dir.path())).unwrap();
    let report = coordinator.process(vec![entry], 1).await.unwrap();

    assert_eq!(report.entries[0].outcome, EntryOutcome::Corrupt);
    assert_eq!(report.counts.corrupt, 1);
    assert!(!dir.path().join("blobs/a").exists());
    assert!(!dir.path().join("blobs/a.partial").exists());
}

#[tokio::test]
async fn test_eviction_removes_least_recently_used_files() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("blobs")).unwrap();

    // 10 files of 95 bytes: 95% of a 1000 byte budget
    let base = SystemTime::now() - Duration::from_secs(3600);
    for i in 0..10u64 {
        let file = root.join(format!("blobs/{}", i));
        std::fs::write(&file, vec![i as u8; 95]).unwrap();
        let stamp = filetime::FileTime::from_system_time(base + Duration::from_secs(i * 60));
        filetime::set_file_times(&file, stamp, stamp).unwrap();
    }

    let mut config = test_config(root);
    config.cache = CacheConfig::with_cache_root(root)
        .with_max_cache_size(1000)
        .with_cleanup_threshold(90);

    let store = std::sync::Arc::new(RecordStore::open(root).unwrap());
    let coordinator = Coordinator::with_store(config, store).unwrap();
    let report = coordinator.enforce_limit().await.unwrap();

    assert!(report.triggered);
    assert_eq!(report.total_before, 950);
    assert!(report.total_after <= 800);
    assert_eq!(report.files_removed, 2);
    assert!(!root.join("blobs/0").exists());
    assert!(!root.join("blobs/1").exists());
    assert!(root.join("blobs/2").exists());
    assert!(root.join("blobs/9").exists());
}

#[tokio::test]
async fn test_cancel_keeps_finished_records_and_partial_files() {
    let server = MockServer::start().await;
    let first = blob(1000, 11);
    let second = blob(1000, 12);
    mount_body(&server, "a", first.clone()).await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 400-999/1000")
                .set_body_bytes(second[400..].to_vec())
                .set_delay(Duration::from_secs(1)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("blobs")).unwrap();
    std::fs::write(dir.path().join("blobs/b.partial"), &second[..400]).unwrap();

    let coordinator = Coordinator::new(test_config(dir.path())).unwrap();
    let token = coordinator.shutdown_token();
    let entries = vec![
        entry_for(&server, "a", &first),
        entry_for(&server, "b", &second),
    ];
    let report = coordinator
        .process_with(entries, 2, |entry| {
            if entry.path == "blobs/a" {
                token.cancel();
            }
        })
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(!report.has_failures());
    if let Some(b) = report.entries.iter().find(|e| e.path == "blobs/b") {
        assert_eq!(b.outcome, EntryOutcome::Interrupted);
    }
    assert!(!dir.path().join("blobs/b").exists());
    assert_eq!(
        std::fs::read(dir.path().join("blobs/b.partial")).unwrap(),
        &second[..400]
    );
    drop(coordinator);

    let store = RecordStore::open(dir.path()).unwrap();
    let record = store.get("blobs/a").unwrap().unwrap();
    assert_eq!(record.outcome, VerificationOutcome::Valid);
    assert!(store.get("blobs/b").unwrap().is_none());
}
