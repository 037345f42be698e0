//! Shared test helpers for loopback integration tests.

use std::path::Path;
use std::time::Duration;

use drip_app::loopback::LoopbackOptions;
use drip_files::FileSource;
use drip_protocol::types::PeerId;
use drip_transfer::TransferConfig;

pub use drip_net::testing::init_test_tracing;

/// Options with fast retries so lossy runs finish quickly.
pub fn options(peers: &[&str], download_dir: &Path) -> LoopbackOptions {
    LoopbackOptions {
        peers: peers.iter().map(|p| PeerId::from(*p)).collect(),
        rejecting: Vec::new(),
        loss_rate: 0.0,
        latency: Duration::ZERO,
        download_dir: download_dir.to_path_buf(),
        config: TransferConfig {
            chunk_size: 1024,
            retry_interval: Duration::from_millis(20),
            retry_timeout: Duration::from_millis(20),
            max_retries: 50,
        },
    }
}

/// Write a file with deterministic content and return it as a source.
pub async fn source_file(dir: &Path, name: &str, size: usize) -> (FileSource, Vec<u8>) {
    let data: Vec<u8> = (0..size).map(|i| (i % 241) as u8).collect();
    let path = dir.join(name);
    tokio::fs::write(&path, &data).await.unwrap();
    (FileSource::from_path(&path).await.unwrap(), data)
}
