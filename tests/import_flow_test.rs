mod support;

use shelf::import::{run_import_sync, ImportRequest, ImportTracker, TaskStatus};
use shelf::library::CategoryStore;
use shelf::metadata::resolve_book_metadata;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use support::{tracing_init, write_sample_epub};
use tempfile::TempDir;
use tokio::time::sleep;

struct TestEnv {
    _temp: TempDir,
    library: PathBuf,
    store: CategoryStore,
    tracker: ImportTracker,
}

fn setup() -> TestEnv {
    tracing_init();
    let temp = TempDir::new().unwrap();
    let library = temp.path().join("library");
    fs::create_dir_all(&library).unwrap();
    let store = CategoryStore::new(temp.path().join("user_metadata.json"));
    let tracker = ImportTracker::start(library.clone(), store.clone());
    TestEnv {
        library,
        store,
        tracker,
        _temp: temp,
    }
}

fn request(archive: &Path, name: &str, categories: &[&str]) -> ImportRequest {
    ImportRequest {
        archive_path: archive.to_path_buf(),
        display_name: name.to_string(),
        categories: categories.iter().map(|c| c.to_string()).collect(),
    }
}

/// Poll until the task reaches a terminal status, advancing the cursor with
/// each response's `next_index` and collecting every log increment.
async fn poll_to_completion(
    tracker: &ImportTracker,
    task_id: &str,
) -> (TaskStatus, Vec<String>, Option<String>, Option<String>) {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut cursor = 0;
    let mut streamed = Vec::new();
    let mut last_current = 0;
    loop {
        let snapshot = tracker.poll(task_id, cursor);
        assert!(snapshot.found, "task disappeared mid-run");
        assert!(snapshot.next_index >= cursor);
        assert!(snapshot.current >= last_current, "progress went backwards");
        last_current = snapshot.current;
        if snapshot.total > 0 {
            assert!(snapshot.current <= snapshot.total);
            assert!(snapshot.percent <= 100);
        }
        streamed.extend(snapshot.logs);
        cursor = snapshot.next_index;
        let status = snapshot.status.unwrap();
        if status.is_terminal() {
            return (status, streamed, snapshot.book_dir, snapshot.error);
        }
        assert!(Instant::now() < deadline, "import did not finish in time");
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn import_completes_and_log_stream_is_exact() {
    let env = setup();
    let archive = write_sample_epub(env._temp.path(), "upload.zip");

    let task_id = env
        .tracker
        .submit(request(&archive, "My Book.epub", &["Fiction"]));

    let (status, streamed, book_dir, error) = poll_to_completion(&env.tracker, &task_id).await;
    assert_eq!(status, TaskStatus::Done, "unexpected error: {:?}", error);
    assert_eq!(book_dir.as_deref(), Some("My_Book"));

    // The cursor-chained increments reproduce the full log exactly once.
    let full = env.tracker.poll(&task_id, 0);
    assert_eq!(streamed, full.logs);
    assert!(streamed.iter().any(|l| l.contains("Extracted to")));

    // Content was rewritten in place.
    let book_root = env.library.join("My_Book");
    let css = fs::read_to_string(book_root.join("OPS/styles/main.css")).unwrap();
    assert!(css.contains("horizontal-tb"));
    assert!(!css.contains("vertical-rl"));
    let chapter = fs::read_to_string(book_root.join("OPS/chapter1.xhtml")).unwrap();
    assert!(!chapter.contains("<a "));
    assert!(chapter.contains("window.location.replace"));

    // Upload artifact was removed, categories persisted.
    assert!(!archive.exists());
    assert_eq!(
        env.store.load()["My_Book"].categories,
        vec!["Fiction".to_string()]
    );

    // The extracted book resolves display metadata end to end.
    let meta = resolve_book_metadata(&env.library, "My_Book");
    assert_eq!(meta.title, "Sample Book");
    assert_eq!(meta.author, "A. Writer");
    assert_eq!(meta.cover.as_deref(), Some("My_Book/OPS/images/cover.jpg"));
}

#[tokio::test]
async fn polling_an_unknown_task_reports_not_found() {
    let env = setup();
    let snapshot = env.tracker.poll("no-such-task", 0);
    assert!(!snapshot.found);
    assert!(snapshot.status.is_none());
    assert!(snapshot.logs.is_empty());
    assert_eq!(snapshot.next_index, 0);
}

#[tokio::test]
async fn colliding_display_names_get_distinct_directories() {
    let env = setup();
    let first = write_sample_epub(env._temp.path(), "a.zip");
    let second = write_sample_epub(env._temp.path(), "b.zip");

    let id_a = env.tracker.submit(request(&first, "book.epub", &[]));
    let (status_a, _, dir_a, _) = poll_to_completion(&env.tracker, &id_a).await;
    let id_b = env.tracker.submit(request(&second, "book.epub", &[]));
    let (status_b, _, dir_b, _) = poll_to_completion(&env.tracker, &id_b).await;

    assert_eq!(status_a, TaskStatus::Done);
    assert_eq!(status_b, TaskStatus::Done);
    let dir_a = dir_a.unwrap();
    let dir_b = dir_b.unwrap();
    assert_ne!(dir_a, dir_b);
    assert!(env.library.join(&dir_a).is_dir());
    assert!(env.library.join(&dir_b).is_dir());
}

#[tokio::test]
async fn corrupt_archive_surfaces_an_error_task() {
    let env = setup();
    let archive = env._temp.path().join("corrupt.zip");
    fs::write(&archive, b"definitely not a zip archive").unwrap();

    let task_id = env.tracker.submit(request(&archive, "broken.epub", &[]));
    let (status, logs, book_dir, error) = poll_to_completion(&env.tracker, &task_id).await;

    assert_eq!(status, TaskStatus::Error);
    assert!(book_dir.is_none());
    assert!(error.unwrap().contains("Unpack failed"));
    assert!(logs.iter().any(|l| l.contains("Error processing")));
    // Best-effort cleanup of the upload still ran.
    assert!(!archive.exists());
}

#[tokio::test]
async fn expired_tasks_are_swept_on_poll() {
    tracing_init();
    let temp = TempDir::new().unwrap();
    let library = temp.path().join("library");
    fs::create_dir_all(&library).unwrap();
    let store = CategoryStore::new(temp.path().join("user_metadata.json"));
    let tracker = ImportTracker::start_with_retention(
        library,
        store,
        chrono::Duration::milliseconds(100),
    );

    let archive = write_sample_epub(temp.path(), "short-lived.zip");
    let task_id = tracker.submit(request(&archive, "fleeting.epub", &[]));
    assert!(tracker.poll(&task_id, 0).found);

    sleep(Duration::from_millis(250)).await;
    assert!(!tracker.poll(&task_id, 0).found);
}

#[test]
fn sync_fallback_returns_logs_and_result_directly() {
    tracing_init();
    let temp = TempDir::new().unwrap();
    let library = temp.path().join("library");
    fs::create_dir_all(&library).unwrap();
    let store = CategoryStore::new(temp.path().join("user_metadata.json"));

    let archive = write_sample_epub(temp.path(), "sync.zip");
    let (logs, result) = run_import_sync(
        &library,
        &store,
        &request(&archive, "sync-book.epub", &["Tech"]),
    );

    let book_dir = result.unwrap();
    assert_eq!(book_dir, "sync-book");
    assert!(library.join(&book_dir).is_dir());
    assert!(logs.iter().any(|l| l.contains("Extracted to")));
    assert!(logs.iter().any(|l| l.contains("Added categories: Tech")));
}

#[test]
fn sync_fallback_reports_failures_with_logs() {
    tracing_init();
    let temp = TempDir::new().unwrap();
    let library = temp.path().join("library");
    fs::create_dir_all(&library).unwrap();
    let store = CategoryStore::new(temp.path().join("user_metadata.json"));

    let archive = temp.path().join("corrupt.zip");
    fs::write(&archive, b"nope").unwrap();
    let (logs, result) = run_import_sync(&library, &store, &request(&archive, "bad.epub", &[]));

    assert!(result.is_err());
    assert!(logs.iter().any(|l| l.contains("Error processing")));
}
