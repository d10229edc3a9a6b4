use super::*;
use crate::fs::{EntryKind, FilesystemProbe};
use crate::notify::{
    Action, Notifier, ACCEPT_ERROR_GENERIC, ACCEPT_FAILED_SUMMARY, CANCEL_ERROR_GENERIC,
    CANCEL_FAILED_SUMMARY, NEW_TRANSFER_SUMMARY, TRANSFER_ALREADY_ACCEPTED,
    TRANSFER_CANCELED_SUMMARY, TRANSFER_NOT_CANCELABLE,
};
use crate::notify::ActionKey;
use crate::peer::{PeerInfo, StaticPeers};
use crate::transfer::FileNode;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

const PEER: &str = "172.20.0.5";
const PEER_HOSTNAME: &str = "peer.nord";
const DENIED_PEER: &str = "172.20.0.6";
const TRANSFER_ID: &str = "c13c619c-c70b-49b8-9396-72de88155c43";
const OTHER_ID: &str = "022cb1eb-ee22-431a-80c5-ba3050493c17";

#[derive(Default)]
struct MockEngine {
    accepted: Mutex<Vec<(String, PathBuf, Option<String>)>>,
    canceled_files: Mutex<Vec<(String, String)>>,
    finalized: Mutex<Vec<String>>,
}

impl MockEngine {
    fn finalized(&self) -> Vec<String> {
        self.finalized.lock().unwrap().clone()
    }

    fn accepted(&self) -> Vec<(String, PathBuf, Option<String>)> {
        self.accepted.lock().unwrap().clone()
    }
}

impl TransferEngine for MockEngine {
    fn accept(&self, transfer: &str, destination: &Path, file: Option<&str>) -> anyhow::Result<()> {
        self.accepted.lock().unwrap().push((
            transfer.to_string(),
            destination.to_path_buf(),
            file.map(str::to_string),
        ));
        Ok(())
    }

    fn cancel_file(&self, transfer: &str, file: &str) -> anyhow::Result<()> {
        self.canceled_files
            .lock()
            .unwrap()
            .push((transfer.to_string(), file.to_string()));
        Ok(())
    }

    fn finalize(&self, transfer: &str) -> anyhow::Result<()> {
        self.finalized.lock().unwrap().push(transfer.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Sent {
    id: u32,
    summary: String,
    body: String,
    actions: Vec<Action>,
}

#[derive(Default)]
struct MockNotifier {
    next_id: AtomicU32,
    sent: Mutex<Vec<Sent>>,
}

impl MockNotifier {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Notifier for MockNotifier {
    fn send(&self, summary: &str, body: &str, actions: &[Action]) -> anyhow::Result<u32> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(Sent {
            id,
            summary: summary.to_string(),
            body: body.to_string(),
            actions: actions.to_vec(),
        });
        Ok(id)
    }

    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct MockFilesystem {
    entries: HashMap<PathBuf, EntryKind>,
    free_space: u64,
}

impl MockFilesystem {
    fn new(free_space: u64) -> Self {
        let entries = [
            ("directory", EntryKind::Directory),
            ("symlink", EntryKind::Symlink),
            ("file", EntryKind::File),
        ]
        .into_iter()
        .map(|(path, kind)| (PathBuf::from(path), kind))
        .collect();
        Self {
            entries,
            free_space,
        }
    }
}

impl FilesystemProbe for MockFilesystem {
    fn entry_kind(&self, path: &Path) -> io::Result<EntryKind> {
        self.entries
            .get(path)
            .copied()
            .ok_or_else(|| io::ErrorKind::NotFound.into())
    }

    fn free_space(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.free_space)
    }
}

#[derive(Default)]
struct MemoryStorage {
    stored: Vec<Transfer>,
    saved: Mutex<Vec<Transfer>>,
}

impl Storage for MemoryStorage {
    fn load(&self) -> anyhow::Result<Vec<Transfer>> {
        Ok(self.stored.clone())
    }

    fn save(&self, transfer: &Transfer) -> anyhow::Result<()> {
        self.saved.lock().unwrap().push(transfer.clone());
        Ok(())
    }
}

struct TestEnv {
    manager: EventManager,
    engine: Arc<MockEngine>,
    storage: Arc<MemoryStorage>,
    notifier: Arc<MockNotifier>,
    opened: Arc<Mutex<Vec<PathBuf>>>,
}

fn peers() -> Arc<StaticPeers> {
    Arc::new(
        StaticPeers::new()
            .with_peer(PeerInfo {
                address: PEER.to_string(),
                hostname: Some(PEER_HOSTNAME.to_string()),
                allow_fileshare: true,
            })
            .with_peer(PeerInfo {
                address: DENIED_PEER.to_string(),
                hostname: None,
                allow_fileshare: false,
            }),
    )
}

fn build(storage: MemoryStorage, notifications: Option<(MockFilesystem, &str)>) -> TestEnv {
    let engine = Arc::new(MockEngine::default());
    let storage = Arc::new(storage);
    let notifier = Arc::new(MockNotifier::default());
    let opened = Arc::new(Mutex::new(Vec::new()));

    let mut manager = EventManager::new(peers(), engine.clone()).with_storage(storage.clone());
    if let Some((filesystem, download_dir)) = notifications {
        let sink = opened.clone();
        let bridge = NotificationManager::new(notifier.clone(), Arc::new(filesystem), download_dir)
            .with_opener(move |path| sink.lock().unwrap().push(path.to_path_buf()));
        manager = manager.with_notifications(bridge);
    }

    TestEnv {
        manager,
        engine,
        storage,
        notifier,
        opened,
    }
}

fn setup() -> TestEnv {
    build(MemoryStorage::default(), None)
}

fn setup_with_notifications(download_dir: &str, free_space: u64) -> TestEnv {
    build(
        MemoryStorage::default(),
        Some((MockFilesystem::new(free_space), download_dir)),
    )
}

fn request_received(peer: &str, transfer: &str, files: &str) -> String {
    format!(
        r#"{{"type":"RequestReceived","data":{{"peer":"{peer}","transfer":"{transfer}","files":{files}}}}}"#
    )
}

fn request_queued(transfer: &str, files: &str) -> String {
    format!(r#"{{"type":"RequestQueued","data":{{"transfer":"{transfer}","files":{files}}}}}"#)
}

fn transfer_started(transfer: &str, file: &str) -> String {
    format!(r#"{{"type":"TransferStarted","data":{{"transfer":"{transfer}","file":"{file}"}}}}"#)
}

fn transfer_progress(transfer: &str, file: &str, bytes: u64) -> String {
    format!(
        r#"{{"type":"TransferProgress","data":{{"transfer":"{transfer}","file":"{file}","transfered":{bytes}}}}}"#
    )
}

fn transfer_finished(transfer: &str, reason: &str, data: &str) -> String {
    format!(
        r#"{{"type":"TransferFinished","data":{{"transfer":"{transfer}","reason":"{reason}","data":{data}}}}}"#
    )
}

fn file_finished(transfer: &str, reason: &str, file: &str) -> String {
    transfer_finished(transfer, reason, &format!(r#"{{"file":"{file}"}}"#))
}

/// 一个已开始传输的单文件传输
fn insert_ongoing(env: &TestEnv, direction: Direction, file: &str) {
    let mut transfer = Transfer::incoming(
        TRANSFER_ID,
        PEER,
        vec![FileNode::new(file, 1).with_status(Status::Ongoing)],
    );
    transfer.direction = direction;
    transfer.status = Status::Ongoing;
    transfer.total_size = 1;
    assert!(env.manager.registry.insert(transfer));
}

#[test]
fn test_request_received_creates_transfer() {
    let env = setup();
    env.manager.handle_event(&request_received(
        PEER,
        TRANSFER_ID,
        r#"[{"id":"testfile-small","size":1048576},{"id":"testfile-big","size":10485760}]"#,
    ));

    let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
    assert_eq!(transfer.direction, Direction::Incoming);
    assert_eq!(transfer.status, Status::Requested);
    assert_eq!(transfer.peer, PEER);
    assert_eq!(transfer.path, None);
    assert_eq!(transfer.files.len(), 2);
    assert_eq!(transfer.total_size, 0);
}

#[test]
fn test_request_from_unauthorized_peer_is_ignored() {
    let env = setup();
    env.manager
        .handle_event(&request_received("10.0.0.1", TRANSFER_ID, r#"[{"id":"a","size":1}]"#));
    env.manager
        .handle_event(&request_received(DENIED_PEER, OTHER_ID, r#"[{"id":"a","size":1}]"#));

    assert!(env.manager.transfers().is_empty());
    assert_eq!(
        env.manager.transfer(TRANSFER_ID),
        Err(FileshareError::TransferNotFound)
    );
}

#[test]
fn test_duplicate_request_keeps_first() {
    let env = setup();
    env.manager
        .handle_event(&request_received(PEER, TRANSFER_ID, r#"[{"id":"a","size":1}]"#));
    env.manager.handle_event(&request_received(
        PEER,
        TRANSFER_ID,
        r#"[{"id":"b","size":2},{"id":"c","size":3}]"#,
    ));

    let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
    assert_eq!(transfer.files, vec![FileNode::new("a", 1)]);
}

#[test]
fn test_transfers_are_copies() {
    let env = setup();
    env.manager
        .new_outgoing_transfer(TRANSFER_ID, PEER, "/test1")
        .unwrap();

    let mut transfers = env.manager.transfers();
    transfers[0].path = Some("/test2".into());
    transfers[0].status = Status::Success;

    let stored = env.manager.transfer(TRANSFER_ID).unwrap();
    assert_eq!(stored.path, Some("/test1".into()));
    assert_eq!(stored.status, Status::Requested);
}

#[test]
fn test_outgoing_request_queued() {
    let env = setup();
    env.manager.new_outgoing_transfer(TRANSFER_ID, PEER, "/tmp").unwrap();
    assert_eq!(
        env.manager.new_outgoing_transfer(TRANSFER_ID, PEER, "/tmp"),
        Err(FileshareError::TransferExists)
    );

    env.manager.handle_event(&request_queued(
        TRANSFER_ID,
        r#"[{"id":"file1.txt","size":100,"children":{}},{"id":"file2.txt","size":1000,"children":{}}]"#,
    ));

    let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
    assert_eq!(transfer.direction, Direction::Outgoing);
    assert_eq!(transfer.files.len(), 2);
    assert_eq!(transfer.status, Status::Requested);
    assert_eq!(transfer.total_size, 0);
}

#[test]
fn test_transfer_progress() {
    let env = setup();
    env.manager.new_outgoing_transfer(TRANSFER_ID, PEER, "/tmp").unwrap();
    env.manager.handle_event(&request_queued(
        TRANSFER_ID,
        r#"[
            {"id":"file1.txt","size":100},
            {"id":"file2.txt","size":1000},
            {"id":"level2","size":0,"children":{"file3.txt":{"id":"file3.txt","size":1000}}}
        ]"#,
    ));
    let mut rx = env.manager.subscribe(TRANSFER_ID).unwrap();

    env.manager.handle_event(&transfer_started(TRANSFER_ID, "file1.txt"));
    env.manager.handle_event(&transfer_started(TRANSFER_ID, "file2.txt"));
    let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
    assert_eq!(transfer.total_size, 1100);
    assert_eq!(transfer.status, Status::Ongoing);

    env.manager.handle_event(&transfer_progress(TRANSFER_ID, "file1.txt", 100));

    let ongoing = Progress {
        status: Status::Ongoing,
        transferred: 0,
    };
    assert_eq!(rx.try_recv().unwrap(), ongoing);
    assert_eq!(rx.try_recv().unwrap(), ongoing);
    assert_eq!(
        rx.try_recv().unwrap(),
        Progress {
            status: Status::Ongoing,
            transferred: 9,
        }
    );

    for file in ["file1.txt", "file2.txt", "level2/file3.txt"] {
        env.manager
            .handle_event(&file_finished(TRANSFER_ID, "FileUploaded", file));
    }

    assert_eq!(
        env.manager.transfer(TRANSFER_ID).unwrap().status,
        Status::Success
    );
    assert_eq!(rx.try_recv().unwrap().status, Status::Success);
    assert!(!env.manager.subscriptions.is_subscribed(TRANSFER_ID));
    assert_eq!(env.engine.finalized(), vec![TRANSFER_ID.to_string()]);
    assert_eq!(env.storage.saved.lock().unwrap().len(), 1);
}

#[test]
fn test_progress_accounting() {
    let env = setup();
    env.manager.new_outgoing_transfer(TRANSFER_ID, PEER, "/tmp").unwrap();
    env.manager.handle_event(&request_queued(
        TRANSFER_ID,
        r#"[{"id":"a","size":100},{"id":"b","size":100}]"#,
    ));

    // 未开始的文件不计入进度
    env.manager.handle_event(&transfer_progress(TRANSFER_ID, "a", 50));
    assert_eq!(env.manager.transfer(TRANSFER_ID).unwrap().total_transferred, 0);

    env.manager.handle_event(&transfer_started(TRANSFER_ID, "a"));
    env.manager.handle_event(&transfer_started(TRANSFER_ID, "a"));
    assert_eq!(env.manager.transfer(TRANSFER_ID).unwrap().total_size, 100);

    env.manager.handle_event(&transfer_progress(TRANSFER_ID, "a", 30));
    env.manager.handle_event(&transfer_progress(TRANSFER_ID, "a", 30));
    env.manager.handle_event(&transfer_progress(TRANSFER_ID, "a", 20));
    env.manager.handle_event(&transfer_progress(TRANSFER_ID, "a", 75));
    env.manager.handle_event(&transfer_progress(TRANSFER_ID, "missing", 75));

    let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
    assert_eq!(transfer.total_transferred, 75);
    assert_eq!(transfer.percentage(), 75);
}

/// test/file_A=1, test/file_B=2, test/file_C=3
fn insert_abc_request(env: &TestEnv) {
    env.manager.handle_event(&request_received(
        PEER,
        TRANSFER_ID,
        r#"[{"id":"test","size":0,"children":{
            "file_A":{"id":"file_A","size":1},
            "file_B":{"id":"file_B","size":2},
            "file_C":{"id":"file_C","size":3}
        }}]"#,
    ));
}

#[test]
fn test_accept_transfer() {
    struct Case {
        name: &'static str,
        transfer: &'static str,
        files: &'static [&'static str],
        limit: u64,
        expected: Option<FileshareError>,
    }

    let cases = [
        Case {
            name: "whole transfer within limit",
            transfer: TRANSFER_ID,
            files: &[],
            limit: 6,
            expected: None,
        },
        Case {
            name: "single file within limit",
            transfer: TRANSFER_ID,
            files: &["test/file_A"],
            limit: 1,
            expected: None,
        },
        Case {
            name: "directory selection",
            transfer: TRANSFER_ID,
            files: &["test"],
            limit: 6,
            expected: None,
        },
        Case {
            name: "invalid transfer",
            transfer: "invalid_transfer",
            files: &[],
            limit: 6,
            expected: Some(FileshareError::TransferNotFound),
        },
        Case {
            name: "invalid file",
            transfer: TRANSFER_ID,
            files: &["invalid_file"],
            limit: 6,
            expected: Some(FileshareError::FileNotFound),
        },
        Case {
            name: "whole transfer over limit",
            transfer: TRANSFER_ID,
            files: &[],
            limit: 5,
            expected: Some(FileshareError::SizeLimitExceeded),
        },
        Case {
            name: "single file over limit",
            transfer: TRANSFER_ID,
            files: &["test/file_C"],
            limit: 2,
            expected: Some(FileshareError::SizeLimitExceeded),
        },
    ];

    for case in cases {
        let env = setup();
        insert_abc_request(&env);
        let files: Vec<String> = case.files.iter().map(ToString::to_string).collect();

        let result = env
            .manager
            .accept_transfer(case.transfer, "/tmp", &files, case.limit);

        match case.expected {
            None => {
                let accepted = result.unwrap_or_else(|e| panic!("{}: {e}", case.name));
                assert_eq!(accepted.status, Status::Ongoing, "{}", case.name);
                assert_eq!(accepted.path, Some("/tmp".into()), "{}", case.name);
                assert_eq!(
                    env.manager.transfer(TRANSFER_ID).unwrap(),
                    accepted,
                    "{}",
                    case.name
                );
            }
            Some(expected) => {
                assert_eq!(result, Err(expected), "{}", case.name);
                if let Ok(transfer) = env.manager.transfer(TRANSFER_ID) {
                    assert_eq!(transfer.status, Status::Requested, "{}", case.name);
                    assert!(
                        tree::leaves(&transfer.files)
                            .iter()
                            .all(|(_, leaf)| leaf.status == Status::Requested),
                        "{}",
                        case.name
                    );
                }
                assert!(env.engine.accepted().is_empty(), "{}", case.name);
            }
        }
    }
}

#[test]
fn test_partial_accept_cancels_unselected_files() {
    let env = setup();
    insert_abc_request(&env);

    env.manager
        .accept_transfer(TRANSFER_ID, "/downloads", &["test/file_B".to_string()], 10)
        .unwrap();

    let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
    let statuses: Vec<(String, Status)> = tree::leaves(&transfer.files)
        .into_iter()
        .map(|(path, leaf)| (path, leaf.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("test/file_A".to_string(), Status::Canceled),
            ("test/file_B".to_string(), Status::Requested),
            ("test/file_C".to_string(), Status::Canceled),
        ]
    );
    assert_eq!(
        env.engine.accepted(),
        vec![(
            TRANSFER_ID.to_string(),
            PathBuf::from("/downloads"),
            Some("test/file_B".to_string())
        )]
    );

    // 只剩选中的文件，完成后传输成功
    env.manager
        .handle_event(&file_finished(TRANSFER_ID, "FileDownloaded", "test/file_B"));
    assert_eq!(
        env.manager.transfer(TRANSFER_ID).unwrap().status,
        Status::Success
    );
}

#[test]
fn test_accept_whole_transfer_notifies_engine_once() {
    let env = setup();
    insert_abc_request(&env);
    env.manager
        .accept_transfer(TRANSFER_ID, "/downloads", &[], u64::MAX)
        .unwrap();
    assert_eq!(
        env.engine.accepted(),
        vec![(TRANSFER_ID.to_string(), PathBuf::from("/downloads"), None)]
    );
}

#[test]
fn test_accept_outgoing_transfer() {
    let env = setup();
    env.manager.new_outgoing_transfer(TRANSFER_ID, PEER, "/tmp").unwrap();
    assert_eq!(
        env.manager.accept_transfer(TRANSFER_ID, "/tmp", &[], u64::MAX),
        Err(FileshareError::TransferAcceptOutgoing)
    );
}

#[test]
fn test_accept_twice() {
    let env = setup();
    insert_abc_request(&env);
    assert!(env
        .manager
        .accept_transfer(TRANSFER_ID, "/tmp", &[], u64::MAX)
        .is_ok());
    assert_eq!(
        env.manager.accept_transfer(TRANSFER_ID, "/tmp", &[], u64::MAX),
        Err(FileshareError::TransferAlreadyAccepted)
    );
}

#[test]
fn test_concurrent_accept() {
    let env = setup();
    insert_abc_request(&env);

    let manager = &env.manager;
    let results: Vec<Result<Transfer>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(move || manager.accept_transfer(TRANSFER_ID, "/tmp", &[], u64::MAX)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == FileshareError::TransferAlreadyAccepted));
    assert_eq!(env.engine.accepted().len(), 1);
}

#[test]
fn test_set_transfer_status() {
    let env = setup();
    insert_abc_request(&env);
    env.manager
        .set_transfer_status(TRANSFER_ID, Status::Ongoing)
        .unwrap();
    assert_eq!(
        env.manager.transfer(TRANSFER_ID).unwrap().status,
        Status::Ongoing
    );
    assert_eq!(
        env.manager.set_transfer_status("missing", Status::Ongoing),
        Err(FileshareError::TransferNotFound)
    );
}

#[test]
fn test_finished_file_reasons() {
    let cases = [
        ("FileUploaded", r#"{"file":"file_id"}"#, Status::Success),
        (
            "FileFailed",
            r#"{"file":"file_id","status":3}"#,
            Status::FinishedWithErrors,
        ),
        ("FileCanceled", r#"{"file":"file_id"}"#, Status::Canceled),
        ("FileUploaded", r#"{"file":"unknown_id"}"#, Status::Ongoing),
    ];

    for (reason, data, expected) in cases {
        let env = setup();
        insert_ongoing(&env, Direction::Outgoing, "file_id");
        env.manager
            .handle_event(&transfer_finished(TRANSFER_ID, reason, data));

        let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
        assert_eq!(transfer.status, expected, "{reason} {data}");
        assert_eq!(transfer.finalized, expected.is_terminal(), "{reason} {data}");
    }
}

#[test]
fn test_failed_file_records_status_code() {
    let env = setup();
    insert_ongoing(&env, Direction::Incoming, "file_id");
    env.manager.handle_event(&transfer_finished(
        TRANSFER_ID,
        "FileFailed",
        r#"{"file":"file_id","status":15}"#,
    ));
    let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
    assert_eq!(transfer.files[0].status, Status::Io);
}

#[test]
fn test_reinitialized_transfer_finalizes_again() {
    let env = setup();
    insert_ongoing(&env, Direction::Outgoing, "file_id");

    for (reason, expected) in [
        ("FileUploaded", Status::Success),
        ("FileCanceled", Status::Canceled),
    ] {
        env.manager.registry.update(TRANSFER_ID, |t| {
            t.status = Status::Ongoing;
            t.finalized = false;
            tree::set_all_status(&mut t.files, Status::Ongoing);
        });
        env.manager
            .handle_event(&file_finished(TRANSFER_ID, reason, "file_id"));
        assert_eq!(env.manager.transfer(TRANSFER_ID).unwrap().status, expected);
    }
    assert_eq!(env.engine.finalized().len(), 2);
}

#[test]
fn test_finalize_fires_once() {
    let env = setup();
    env.manager.new_outgoing_transfer(TRANSFER_ID, PEER, "/tmp").unwrap();
    env.manager.handle_event(&request_queued(
        TRANSFER_ID,
        r#"[{"id":"a","size":1},{"id":"b","size":1}]"#,
    ));

    env.manager
        .handle_event(&file_finished(TRANSFER_ID, "FileUploaded", "a"));
    assert!(env.engine.finalized().is_empty());
    env.manager
        .handle_event(&file_finished(TRANSFER_ID, "FileUploaded", "b"));
    env.manager
        .handle_event(&file_finished(TRANSFER_ID, "FileUploaded", "b"));
    env.manager
        .handle_event(&transfer_finished(TRANSFER_ID, "TransferCanceled", "{}"));
    env.manager.handle_event(&transfer_finished(
        TRANSFER_ID,
        "TransferFailed",
        r#"{"status":4}"#,
    ));

    let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
    assert_eq!(transfer.status, Status::Success);
    assert!(transfer.finalized);
    assert_eq!(env.engine.finalized(), vec![TRANSFER_ID.to_string()]);
}

#[test]
fn test_concurrent_finalize_fires_once() {
    for _ in 0..100 {
        let env = setup();
        env.manager.new_outgoing_transfer(TRANSFER_ID, PEER, "/tmp").unwrap();
        env.manager.handle_event(&request_queued(
            TRANSFER_ID,
            r#"[{"id":"a","size":1},{"id":"b","size":1}]"#,
        ));

        let manager = &env.manager;
        let uploaded_a = file_finished(TRANSFER_ID, "FileUploaded", "a");
        let uploaded_b = file_finished(TRANSFER_ID, "FileUploaded", "b");
        std::thread::scope(|s| {
            s.spawn(|| manager.handle_event(&uploaded_a));
            s.spawn(|| manager.handle_event(&uploaded_b));
            // 与文件事件竞争，可能已经是终态
            s.spawn(|| {
                let _ = manager.cancel_transfer(TRANSFER_ID);
            });
        });

        let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
        assert!(transfer.status.is_terminal());
        assert!(transfer.finalized);
        assert_eq!(env.engine.finalized(), vec![TRANSFER_ID.to_string()]);
        assert_eq!(env.storage.saved.lock().unwrap().len(), 1);
    }
}

#[test]
fn test_terminal_status_is_sticky() {
    let env = setup();
    insert_ongoing(&env, Direction::Outgoing, "file_id");
    env.manager
        .handle_event(&file_finished(TRANSFER_ID, "FileUploaded", "file_id"));
    env.manager.handle_event(&transfer_finished(
        TRANSFER_ID,
        "FileFailed",
        r#"{"file":"file_id","status":4}"#,
    ));
    env.manager.handle_event(&transfer_started(TRANSFER_ID, "file_id"));

    let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
    assert_eq!(transfer.status, Status::Success);
    assert_eq!(transfer.files[0].status, Status::Transport);
    assert_eq!(env.engine.finalized().len(), 1);
}

#[test]
fn test_transfer_canceled_event() {
    let env = setup();
    env.manager.new_outgoing_transfer(TRANSFER_ID, PEER, "/tmp").unwrap();
    env.manager.handle_event(&request_queued(
        TRANSFER_ID,
        r#"[{"id":"a","size":1},{"id":"b","size":1}]"#,
    ));
    env.manager
        .handle_event(&file_finished(TRANSFER_ID, "FileUploaded", "a"));
    let mut rx = env.manager.subscribe(TRANSFER_ID).unwrap();

    env.manager.handle_event(&transfer_finished(
        TRANSFER_ID,
        "TransferCanceled",
        r#"{"by_peer":true}"#,
    ));

    let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
    assert_eq!(transfer.status, Status::Canceled);
    assert_eq!(transfer.files[0].status, Status::Success);
    assert_eq!(transfer.files[1].status, Status::Canceled);
    assert_eq!(env.engine.finalized(), vec![TRANSFER_ID.to_string()]);
    assert_eq!(rx.try_recv().unwrap().status, Status::Canceled);
}

#[test]
fn test_transfer_failed_event() {
    let env = setup();
    insert_abc_request(&env);
    env.manager.handle_event(&transfer_finished(
        TRANSFER_ID,
        "TransferFailed",
        r#"{"status":24}"#,
    ));

    let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
    assert_eq!(transfer.status, Status::FinishedWithErrors);
    assert!(tree::leaves(&transfer.files)
        .iter()
        .all(|(_, leaf)| leaf.status == Status::TransferTimeout));
    assert_eq!(env.storage.saved.lock().unwrap()[0].id, TRANSFER_ID);
}

#[test]
fn test_events_for_unknown_transfer_are_dropped() {
    let env = setup();
    env.manager.handle_event(&transfer_finished(
        TRANSFER_ID,
        "TransferFailed",
        r#"{"status":4}"#,
    ));
    env.manager.handle_event(&transfer_started(TRANSFER_ID, "a"));
    env.manager.handle_event(&request_queued(TRANSFER_ID, "[]"));
    env.manager.handle_event("{broken");
    env.manager
        .handle_event(r#"{"type":"TransferPaused","data":{"transfer":"x"}}"#);

    assert!(env.manager.transfers().is_empty());
    assert!(env.engine.finalized().is_empty());
}

#[test]
fn test_cancel_transfer() {
    let env = setup();
    insert_abc_request(&env);
    env.manager
        .accept_transfer(TRANSFER_ID, "/tmp", &[], u64::MAX)
        .unwrap();
    env.manager
        .handle_event(&file_finished(TRANSFER_ID, "FileDownloaded", "test/file_A"));
    let mut rx = env.manager.subscribe(TRANSFER_ID).unwrap();

    env.manager.cancel_transfer(TRANSFER_ID).unwrap();

    let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
    assert_eq!(transfer.status, Status::Canceled);
    let statuses: Vec<Status> = tree::leaves(&transfer.files)
        .iter()
        .map(|(_, leaf)| leaf.status)
        .collect();
    assert_eq!(
        statuses,
        vec![Status::Success, Status::Canceled, Status::Canceled]
    );
    assert_eq!(rx.try_recv().unwrap().status, Status::Canceled);
    assert!(!env.manager.subscriptions.is_subscribed(TRANSFER_ID));

    // 引擎随后上报的取消不会再次 finalize
    env.manager
        .handle_event(&transfer_finished(TRANSFER_ID, "TransferCanceled", "{}"));
    assert_eq!(env.engine.finalized(), vec![TRANSFER_ID.to_string()]);

    assert_eq!(
        env.manager.cancel_transfer(TRANSFER_ID),
        Err(FileshareError::TransferNotCancelable)
    );
    assert_eq!(
        env.manager.cancel_transfer("missing"),
        Err(FileshareError::TransferNotFound)
    );
}

#[test]
fn test_cancel_file() {
    let env = setup();
    insert_abc_request(&env);
    env.manager
        .accept_transfer(TRANSFER_ID, "/tmp", &[], u64::MAX)
        .unwrap();
    env.manager
        .handle_event(&file_finished(TRANSFER_ID, "FileDownloaded", "test/file_A"));

    env.manager.cancel_file(TRANSFER_ID, "test/file_B").unwrap();
    assert_eq!(
        *env.engine.canceled_files.lock().unwrap(),
        vec![(TRANSFER_ID.to_string(), "test/file_B".to_string())]
    );
    // 状态由引擎事件带回
    assert_eq!(
        tree::find(&env.manager.transfer(TRANSFER_ID).unwrap().files, "test/file_B")
            .unwrap()
            .status,
        Status::Requested
    );

    assert_eq!(
        env.manager.cancel_file(TRANSFER_ID, "test/file_A"),
        Err(FileshareError::FileNotCancelable)
    );
    assert_eq!(
        env.manager.cancel_file(TRANSFER_ID, "test/missing"),
        Err(FileshareError::FileNotFound)
    );
    assert_eq!(
        env.manager.cancel_file("missing", "test/file_B"),
        Err(FileshareError::TransferNotFound)
    );
}

#[test]
fn test_subscribe_unknown_transfer() {
    let env = setup();
    assert!(matches!(
        env.manager.subscribe("missing"),
        Err(FileshareError::TransferNotFound)
    ));
}

#[test]
fn test_subscribe_finished_transfer_gets_final_snapshot() {
    let env = setup();
    env.manager.new_outgoing_transfer(TRANSFER_ID, PEER, "/tmp").unwrap();
    env.manager
        .handle_event(&request_queued(TRANSFER_ID, r#"[{"id":"a","size":10}]"#));
    env.manager
        .handle_event(&file_finished(TRANSFER_ID, "FileUploaded", "a"));

    let transfer = env.manager.transfer(TRANSFER_ID).unwrap();
    assert_eq!(transfer.status, Status::Success);

    let mut rx = env.manager.subscribe(TRANSFER_ID).unwrap();
    assert_eq!(rx.try_recv().unwrap(), transfer.progress());
    assert_eq!(
        rx.try_recv(),
        Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
    );
    assert!(!env.manager.subscriptions.is_subscribed(TRANSFER_ID));
}

#[test]
fn test_unsubscribe_releases_sender() {
    let env = setup();
    insert_abc_request(&env);

    let rx = env.manager.subscribe(TRANSFER_ID).unwrap();
    assert!(env.manager.subscriptions.is_subscribed(TRANSFER_ID));
    env.manager.unsubscribe(TRANSFER_ID, rx);
    assert!(!env.manager.subscriptions.is_subscribed(TRANSFER_ID));
}

#[test]
fn test_unsubscribe_replaced_watcher_keeps_newer_one() {
    let env = setup();
    insert_abc_request(&env);

    let old = env.manager.subscribe(TRANSFER_ID).unwrap();
    let mut new = env.manager.subscribe(TRANSFER_ID).unwrap();
    env.manager.unsubscribe(TRANSFER_ID, old);
    assert!(env.manager.subscriptions.is_subscribed(TRANSFER_ID));

    env.manager.cancel_transfer(TRANSFER_ID).unwrap();
    assert_eq!(new.try_recv().unwrap().status, Status::Canceled);
}

#[test]
fn test_restore_history() {
    let mut finished = Transfer::incoming(TRANSFER_ID, PEER, vec![FileNode::new("a", 1)]);
    finished.status = Status::Success;
    let storage = MemoryStorage {
        stored: vec![finished, Transfer::outgoing(OTHER_ID, PEER, "/tmp")],
        ..MemoryStorage::default()
    };
    let env = build(storage, None);
    env.manager.new_outgoing_transfer(OTHER_ID, "someone", "/var").unwrap();

    assert_eq!(env.manager.restore_history(), 1);
    assert_eq!(
        env.manager.transfer(TRANSFER_ID).unwrap().status,
        Status::Success
    );
    assert_eq!(env.manager.transfer(OTHER_ID).unwrap().peer, "someone");
}

#[test]
fn test_file_finished_notifications() {
    let cases = [
        (
            Direction::Incoming,
            "FileDownloaded",
            0,
            "downloaded",
            vec![Action::OPEN],
        ),
        (
            Direction::Incoming,
            "FileFailed",
            4,
            "transport problem",
            vec![],
        ),
        (Direction::Incoming, "FileCanceled", 1, "canceled", vec![]),
        (Direction::Outgoing, "FileUploaded", 0, "uploaded", vec![]),
    ];

    for (direction, reason, status, summary, actions) in cases {
        let env = setup_with_notifications("directory", u64::MAX);
        insert_ongoing(&env, direction, "file_id");
        env.manager.handle_event(&transfer_finished(
            TRANSFER_ID,
            reason,
            &format!(r#"{{"file":"file_id","status":{status}}}"#),
        ));

        let sent = env.notifier.sent();
        assert_eq!(sent.len(), 1, "{reason}");
        assert_eq!(sent[0].summary, summary, "{reason}");
        assert_eq!(sent[0].body, "file_id", "{reason}");
        assert_eq!(sent[0].actions, actions, "{reason}");
    }
}

#[test]
fn test_open_file_once() {
    let env = setup_with_notifications("directory", u64::MAX);
    insert_ongoing(&env, Direction::Incoming, "file_id");
    env.manager
        .handle_event(&file_finished(TRANSFER_ID, "FileDownloaded", "file_id"));

    let id = env.notifier.sent()[0].id;
    env.manager.notification_action(id, ActionKey::OpenFile);
    assert_eq!(*env.opened.lock().unwrap(), vec![PathBuf::from("file_id")]);

    env.manager.notification_action(id, ActionKey::OpenFile);
    assert_eq!(env.opened.lock().unwrap().len(), 1);
}

#[test]
fn test_open_file_uses_download_location() {
    let env = setup_with_notifications("directory", u64::MAX);
    env.manager.handle_event(&request_received(
        PEER,
        TRANSFER_ID,
        r#"[{"id":"a","size":1},{"id":"b","size":1}]"#,
    ));
    env.manager
        .accept_transfer(TRANSFER_ID, "/downloads", &[], u64::MAX)
        .unwrap();
    env.notifier.clear();

    env.manager
        .handle_event(&file_finished(TRANSFER_ID, "FileDownloaded", "a"));
    env.manager.handle_event(&transfer_finished(
        TRANSFER_ID,
        "FileDownloaded",
        r#"{"file":"b","final_path":"/downloads/b(1)"}"#,
    ));

    for notification in env.notifier.sent() {
        env.manager
            .notification_action(notification.id, ActionKey::OpenFile);
    }
    assert_eq!(
        *env.opened.lock().unwrap(),
        vec![
            PathBuf::from("/downloads/a"),
            PathBuf::from("/downloads/b(1)")
        ]
    );
}

#[test]
fn test_transfer_request_notification() {
    let env = setup_with_notifications("directory", u64::MAX);
    env.manager
        .handle_event(&request_received(PEER, TRANSFER_ID, r#"[{"id":"a","size":1}]"#));

    let sent = env.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].summary, NEW_TRANSFER_SUMMARY);
    assert_eq!(
        sent[0].body,
        format!("Transfer ID: {TRANSFER_ID}\nFrom: {PEER_HOSTNAME}")
    );
    assert_eq!(sent[0].actions, vec![Action::ACCEPT, Action::CANCEL]);
}

#[test]
fn test_transfer_canceled_notification() {
    let env = setup_with_notifications("directory", u64::MAX);
    insert_ongoing(&env, Direction::Incoming, "file_id");
    env.manager
        .handle_event(&transfer_finished(TRANSFER_ID, "TransferCanceled", "{}"));

    let sent = env.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].summary, TRANSFER_CANCELED_SUMMARY);
    assert_eq!(sent[0].body, TRANSFER_ID);
}

/// 通知 0 对应待接受的传输，通知 1 对应已完成的传输
fn setup_pending_and_finished(download_dir: &str, free_space: u64) -> TestEnv {
    let env = setup_with_notifications(download_dir, free_space);
    let files = r#"[{"id":"file","size":1000}]"#;
    env.manager
        .handle_event(&request_received(PEER, TRANSFER_ID, files));
    env.manager
        .handle_event(&request_received(PEER, OTHER_ID, files));
    env.manager
        .set_transfer_status(OTHER_ID, Status::Success)
        .unwrap();
    env.notifier.clear();
    env
}

#[test]
fn test_accept_from_notification() {
    let cases = [
        ("accepted", "directory", u64::MAX, 0, Status::Ongoing, None),
        (
            "symlink",
            "symlink",
            u64::MAX,
            0,
            Status::Requested,
            Some("Download directory is a symlink"),
        ),
        (
            "not a directory",
            "file",
            u64::MAX,
            0,
            Status::Requested,
            Some("Download directory is not a directory"),
        ),
        (
            "missing directory",
            "missing",
            u64::MAX,
            0,
            Status::Requested,
            Some("Download directory does not exist"),
        ),
        (
            "not enough space",
            "directory",
            1,
            0,
            Status::Requested,
            Some("Not enough space on device"),
        ),
        (
            "already finished",
            "directory",
            u64::MAX,
            1,
            Status::Success,
            Some(TRANSFER_ALREADY_ACCEPTED),
        ),
    ];

    for (name, dir, free_space, notification_id, expected_status, expected_error) in cases {
        let env = setup_pending_and_finished(dir, free_space);
        env.manager
            .notification_action(notification_id, ActionKey::AcceptTransfer);

        let id = if notification_id == 0 {
            TRANSFER_ID
        } else {
            OTHER_ID
        };
        assert_eq!(
            env.manager.transfer(id).unwrap().status,
            expected_status,
            "{name}"
        );

        let sent = env.notifier.sent();
        match expected_error {
            None => {
                assert!(sent.is_empty(), "{name}: {sent:?}");
                assert_eq!(
                    env.engine.accepted(),
                    vec![(TRANSFER_ID.to_string(), PathBuf::from(dir), None)],
                    "{name}"
                );
            }
            Some(body) => {
                assert_eq!(sent.len(), 1, "{name}");
                assert_eq!(sent[0].summary, ACCEPT_FAILED_SUMMARY, "{name}");
                assert_eq!(sent[0].body, body, "{name}");
                assert!(sent[0].actions.is_empty(), "{name}");
            }
        }
    }
}

#[test]
fn test_accept_from_notification_invalid_transfer() {
    let env = setup_pending_and_finished("directory", u64::MAX);
    env.manager.registry.remove(TRANSFER_ID);

    env.manager.notification_action(0, ActionKey::AcceptTransfer);
    env.manager.notification_action(42, ActionKey::AcceptTransfer);

    let sent = env.notifier.sent();
    assert_eq!(sent.len(), 2);
    for notification in sent {
        assert_eq!(notification.summary, ACCEPT_FAILED_SUMMARY);
        assert_eq!(notification.body, ACCEPT_ERROR_GENERIC);
        assert!(notification.actions.is_empty());
    }
}

#[test]
fn test_cancel_from_notification() {
    let cases = [
        ("pending", Status::Requested, None),
        ("already canceled", Status::Canceled, Some(TRANSFER_NOT_CANCELABLE)),
        ("finished", Status::Success, Some(TRANSFER_NOT_CANCELABLE)),
    ];

    for (name, initial, expected_error) in cases {
        let env = setup_with_notifications("directory", u64::MAX);
        env.manager
            .handle_event(&request_received(PEER, TRANSFER_ID, r#"[{"id":"a","size":1}]"#));
        env.manager.set_transfer_status(TRANSFER_ID, initial).unwrap();
        env.notifier.clear();

        env.manager.notification_action(0, ActionKey::CancelTransfer);

        let sent = env.notifier.sent();
        match expected_error {
            None => {
                assert!(sent.is_empty(), "{name}: {sent:?}");
                assert_eq!(
                    env.engine.finalized(),
                    vec![TRANSFER_ID.to_string()],
                    "{name}"
                );
                assert_eq!(
                    env.manager.transfer(TRANSFER_ID).unwrap().status,
                    Status::Canceled,
                    "{name}"
                );
            }
            Some(body) => {
                assert_eq!(sent.len(), 1, "{name}");
                assert_eq!(sent[0].summary, CANCEL_FAILED_SUMMARY, "{name}");
                assert_eq!(sent[0].body, body, "{name}");
                assert!(sent[0].actions.is_empty(), "{name}");
                assert!(env.engine.finalized().is_empty(), "{name}");
            }
        }
    }
}

#[test]
fn test_cancel_from_notification_missing_transfer() {
    let env = setup_with_notifications("directory", u64::MAX);
    env.manager
        .handle_event(&request_received(PEER, TRANSFER_ID, r#"[{"id":"a","size":1}]"#));
    env.manager.registry.remove(TRANSFER_ID);
    env.notifier.clear();

    env.manager.notification_action(0, ActionKey::CancelTransfer);
    env.manager.notification_action(3, ActionKey::CancelTransfer);

    let sent = env.notifier.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent
        .iter()
        .all(|n| n.summary == CANCEL_FAILED_SUMMARY && n.body == CANCEL_ERROR_GENERIC));
}

#[test]
fn test_actions_without_notifications_are_ignored() {
    let env = setup();
    insert_abc_request(&env);
    env.manager.notification_action(0, ActionKey::AcceptTransfer);
    assert_eq!(
        env.manager.transfer(TRANSFER_ID).unwrap().status,
        Status::Requested
    );
}
