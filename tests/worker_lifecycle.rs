//! Worker driver tests: handshake, serving and teardown inside the test
//! process.

use bz2_worker::bz2::{Bzip2Library, StreamLibrary};
use bz2_worker::handshake::read_address;
use bz2_worker::ipc::IpcClient;
use bz2_worker::worker::{run_until, ShutdownHandle, StopReason};
use bz2_worker::{Config, Error};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::fs::File;
use std::os::fd::IntoRawFd;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn config_with(socket_dir: &Path, nonce_fd: Option<i32>) -> Config {
    let mut config = Config::default();
    config.server.socket_dir = Some(socket_dir.to_path_buf());
    config.server.nonce_fd = nonce_fd;
    config
}

fn library() -> Arc<dyn StreamLibrary> {
    Arc::new(Bzip2Library::new())
}

fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn test_missing_nonce_fd_fails_before_binding() {
    let root = tempfile::tempdir().unwrap();
    let config = config_with(root.path(), None);

    let err = run_until(config, library(), std::future::pending())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.is_startup());
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn test_closed_descriptor_fails_before_binding() {
    let root = tempfile::tempdir().unwrap();
    let config = config_with(root.path(), Some(1 << 20));

    let err = run_until(config, library(), std::future::pending())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test]
async fn test_failed_publish_removes_endpoint() {
    let root = tempfile::tempdir().unwrap();
    let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).unwrap();
    drop(read_end);
    let config = config_with(root.path(), Some(write_end.into_raw_fd()));

    let err = run_until(config, library(), std::future::pending())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Handshake(_)));
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publish_serve_and_shut_down() {
    let root = tempfile::tempdir().unwrap();
    let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).unwrap();
    let config = config_with(root.path(), Some(write_end.into_raw_fd()));

    let handle = ShutdownHandle::new();
    let stop = handle.clone();
    let worker = tokio::spawn(async move {
        run_until(config, library(), async move { stop.wait().await }).await
    });

    let address = tokio::task::spawn_blocking(move || {
        let mut reader = File::from(read_end);
        read_address(&mut reader)
    })
    .await
    .unwrap()
    .unwrap();
    assert!(address.to_string().starts_with("unix:"));
    assert!(address.path().starts_with(root.path()));
    assert!(address.path().exists());

    let mut client = IpcClient::connect(&address).await.unwrap();
    let version = client.lib_version().await.unwrap();
    assert!(!version.is_empty());

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!address.path().exists());
    assert_eq!(entries(root.path()), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_workers_publish_distinct_addresses() {
    let root = tempfile::tempdir().unwrap();
    let mut addresses = Vec::new();
    let mut workers = Vec::new();
    let handle = ShutdownHandle::new();

    for _ in 0..2 {
        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).unwrap();
        let config = config_with(root.path(), Some(write_end.into_raw_fd()));
        let stop = handle.clone();
        workers.push(tokio::spawn(async move {
            run_until(config, library(), async move { stop.wait().await }).await
        }));
        let address = tokio::task::spawn_blocking(move || read_address(&mut File::from(read_end)))
            .await
            .unwrap()
            .unwrap();
        addresses.push(address);
    }
    assert_ne!(addresses[0], addresses[1]);

    handle.shutdown();
    for worker in workers {
        worker.await.unwrap().unwrap();
    }
}

#[test]
fn test_stop_reason_names_signal() {
    assert_eq!(StopReason::Signal("SIGTERM"), StopReason::Signal("SIGTERM"));
    assert_ne!(StopReason::Signal("SIGINT"), StopReason::Shutdown);
}
