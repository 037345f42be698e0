//! Sends that lose messages or get declined still end cleanly.

use drip_app::loopback;
use drip_protocol::types::PeerId;
use tempfile::TempDir;

use crate::helpers::{init_test_tracing, options, source_file};

#[tokio::test]
async fn lossy_links_still_deliver() {
    init_test_tracing();
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let (file, data) = source_file(src.path(), "lossy.bin", 8_000).await;

    let mut opts = options(&["alice", "bob"], dst.path());
    opts.loss_rate = 0.2;
    let report = loopback::run(vec![file], opts).await.unwrap().unwrap();

    assert!(report.all_completed(), "{report:?}");
    for peer in ["alice", "bob"] {
        let received = tokio::fs::read(dst.path().join(peer).join("lossy.bin"))
            .await
            .unwrap();
        assert_eq!(received, data);
    }
}

#[tokio::test]
async fn one_rejection_cancels_every_recipient() {
    init_test_tracing();
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let (file, _) = source_file(src.path(), "doc.pdf", 3_000).await;

    let mut opts = options(&["alice", "bob"], dst.path());
    opts.rejecting = vec![PeerId::from("bob")];
    let report = loopback::run(vec![file], opts).await.unwrap().unwrap();

    assert!(!report.all_completed());
    assert_eq!(report.summary.cancelled, 2);
    assert_eq!(report.summary.completed, 0);
    assert_eq!(report.errors, vec!["bob does not allow the transfer".to_string()]);
    assert!(!dst.path().join("alice").join("doc.pdf").exists());
}
