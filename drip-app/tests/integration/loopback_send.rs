use drip_app::loopback;
use tempfile::TempDir;

use crate::helpers::{init_test_tracing, options, source_file};

#[tokio::test]
async fn every_peer_receives_every_file() {
    init_test_tracing();
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let (a, a_data) = source_file(src.path(), "a.bin", 5_000).await;
    let (b, b_data) = source_file(src.path(), "notes", 10).await;

    let report = loopback::run(vec![a, b], options(&["alice", "bob"], dst.path()))
        .await
        .unwrap()
        .unwrap();

    assert!(report.all_completed(), "{report:?}");
    assert_eq!(report.summary.completed, 4);
    for peer in ["alice", "bob"] {
        let dir = dst.path().join(peer);
        assert_eq!(tokio::fs::read(dir.join("a.bin")).await.unwrap(), a_data);
        assert_eq!(tokio::fs::read(dir.join("notes")).await.unwrap(), b_data);
    }
}

#[tokio::test]
async fn empty_file_is_created_empty() {
    init_test_tracing();
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let (empty, _) = source_file(src.path(), "empty.txt", 0).await;

    let report = loopback::run(vec![empty], options(&["alice"], dst.path()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.summary.completed, 1);
    let metadata = tokio::fs::metadata(dst.path().join("alice").join("empty.txt"))
        .await
        .unwrap();
    assert_eq!(metadata.len(), 0);
}

#[tokio::test]
async fn nothing_to_send_is_not_an_error() {
    init_test_tracing();
    let dst = TempDir::new().unwrap();
    let report = loopback::run(Vec::new(), options(&["alice"], dst.path()))
        .await
        .unwrap();
    assert!(report.is_none());
}
