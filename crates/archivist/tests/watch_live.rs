mod support;

use archivist::{DirectoryWatcher, FileEvent, FileEventKind, NoopNotifier, PoolConfig};
use archivist_db::{FileStatus, FileStatusRecord, StatusDb, StatusStore};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use support::*;
use tokio::sync::watch;

const WAIT: Duration = Duration::from_secs(15);

async fn wait_for_terminal(db: &StatusDb, path: &Path) -> Option<FileStatusRecord> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if let Some(record) = db.lookup(key(path)).await.unwrap() {
            if record.status.is_terminal() {
                return Some(record);
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    None
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_live_create_is_archived() {
    let (tmp, root) = watched_root();
    let db = StatusDb::open(tmp.path().join("status.sqlite3"), 4).await.unwrap();
    let backend = Arc::new(CountingBackend::default());
    let pipeline = Arc::new(
        pipeline(&db, backend.clone(), Arc::new(NoopNotifier))
            .with_settle(Duration::from_millis(50)),
    );

    let (watcher, stream) = DirectoryWatcher::subscribe(&root).unwrap();
    let (stop_tx, stop_rx) = watch::channel(false);
    let running = tokio::spawn(pipeline.clone().run_watch(stream, PoolConfig::default(), stop_rx));

    fs::write(root.join("c.jpg"), b"arrived while running").unwrap();
    fs::write(root.join("c.tmp"), b"ignored").unwrap();

    let record = wait_for_terminal(&db, &root.join("c.jpg"))
        .await
        .expect("c.jpg never reached a terminal state");
    assert_eq!(record.status, FileStatus::Success);
    assert!(record.cid.is_some());
    assert!(db.lookup(key(&root.join("c.tmp"))).await.unwrap().is_none());

    stop_tx.send(true).unwrap();
    tokio::time::timeout(WAIT, running)
        .await
        .expect("watch loop did not stop")
        .unwrap()
        .unwrap();
    watcher.unsubscribe().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rename_into_allowed_extension_is_archived() {
    let (tmp, root) = watched_root();
    let db = StatusDb::open(tmp.path().join("status.sqlite3"), 4).await.unwrap();
    let pipeline = Arc::new(
        pipeline(&db, Arc::new(CountingBackend::default()), Arc::new(NoopNotifier))
            .with_settle(Duration::from_millis(50)),
    );

    let (watcher, stream) = DirectoryWatcher::subscribe(&root).unwrap();
    let (stop_tx, stop_rx) = watch::channel(false);
    let running = tokio::spawn(pipeline.clone().run_watch(stream, PoolConfig::default(), stop_rx));

    fs::write(root.join("d.part"), b"written then renamed").unwrap();
    fs::rename(root.join("d.part"), root.join("d.jpg")).unwrap();

    let record = wait_for_terminal(&db, &root.join("d.jpg"))
        .await
        .expect("d.jpg never reached a terminal state");
    assert_eq!(record.status, FileStatus::Success);
    assert!(db.lookup(key(&root.join("d.part"))).await.unwrap().is_none());

    stop_tx.send(true).unwrap();
    tokio::time::timeout(WAIT, running).await.unwrap().unwrap().unwrap();
    drop(watcher);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failures_do_not_stop_the_watch_loop() {
    let (tmp, root) = watched_root();
    let db = StatusDb::open(tmp.path().join("status.sqlite3"), 4).await.unwrap();
    let pipeline = Arc::new(pipeline(
        &db,
        Arc::new(MismatchBackend::default()),
        Arc::new(NoopNotifier),
    ));

    let (watcher, stream) = DirectoryWatcher::subscribe(&root).unwrap();
    let (stop_tx, stop_rx) = watch::channel(false);
    let pool = PoolConfig {
        workers: 2,
        queue_capacity: 4,
    };
    let running = tokio::spawn(pipeline.clone().run_watch(stream, pool, stop_rx));

    for name in ["e1.jpg", "e2.jpg", "e3.jpg"] {
        fs::write(root.join(name), name.as_bytes()).unwrap();
        let record = wait_for_terminal(&db, &root.join(name)).await.unwrap();
        assert_eq!(record.status, FileStatus::Error);
    }
    assert!(!running.is_finished());

    stop_tx.send(true).unwrap();
    tokio::time::timeout(WAIT, running).await.unwrap().unwrap().unwrap();
    watcher.unsubscribe().unwrap();
}

#[tokio::test]
async fn test_shutdown_before_any_event() {
    let (_tmp, root) = watched_root();
    let db = StatusDb::open_memory().await.unwrap();
    let pipeline = Arc::new(pipeline(
        &db,
        Arc::new(CountingBackend::default()),
        Arc::new(NoopNotifier),
    ));

    let (watcher, stream) = DirectoryWatcher::subscribe(&root).unwrap();
    let (_stop_tx, stop_rx) = watch::channel(true);
    tokio::time::timeout(
        Duration::from_secs(5),
        pipeline.run_watch(stream, PoolConfig::default(), stop_rx),
    )
    .await
    .unwrap()
    .unwrap();
    watcher.unsubscribe().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_is_not_held_up_by_a_full_queue() {
    let (_tmp, root) = watched_root();
    let db = StatusDb::open_memory().await.unwrap();
    let backend = Arc::new(CountingBackend::with_delay(Duration::from_millis(500)));
    let pipeline = Arc::new(pipeline(&db, backend.clone(), Arc::new(NoopNotifier)));

    let (events, stream) = tokio::sync::mpsc::unbounded_channel();
    for i in 0..6 {
        let path = root.join(format!("q{i}.jpg"));
        fs::write(&path, format!("payload {i}")).unwrap();
        events
            .send(Ok(FileEvent {
                kind: FileEventKind::Create,
                path,
            }))
            .unwrap();
    }

    // One worker and one queue slot: the loop blocks submitting the third file
    let config = PoolConfig {
        workers: 1,
        queue_capacity: 1,
    };
    let (stop_tx, stop_rx) = watch::channel(false);
    let running = tokio::spawn(pipeline.clone().run_watch(stream, config, stop_rx));

    let deadline = tokio::time::Instant::now() + WAIT;
    while backend.count() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(backend.count(), 1);

    stop_tx.send(true).unwrap();
    tokio::time::timeout(WAIT, running)
        .await
        .expect("watch loop did not stop")
        .unwrap()
        .unwrap();

    // The in-flight file and the one already queued; nothing submitted after
    assert!(backend.count() <= 2, "uploads after shutdown: {}", backend.count());
    drop(events);
}
