use super::*;

#[tokio::test]
async fn second_holder_fails_to_acquire_while_first_holds_the_lock() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lock_path = dir.path().join("agent-a.lock");

    let first = FileLockBackend::new(lock_path.clone(), "holder-1");
    let second = FileLockBackend::new(lock_path.clone(), "holder-2");

    assert!(first.try_acquire().await.expect("first acquire"));
    assert!(!second.try_acquire().await.expect("second acquire attempt"));

    first.release().await.expect("release");
    assert!(second.try_acquire().await.expect("second acquire after release"));
}

#[tokio::test]
async fn get_leader_reports_written_holder_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lock_path = dir.path().join("agent-b.lock");
    let backend = FileLockBackend::new(lock_path, "holder-x");

    assert!(backend.try_acquire().await.expect("acquire"));
    assert_eq!(backend.get_leader().await.expect("get_leader"), Some("holder-x".to_owned()));
}

#[tokio::test]
async fn renew_fails_once_lock_handle_was_never_acquired() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lock_path = dir.path().join("agent-c.lock");
    let backend = FileLockBackend::new(lock_path, "holder-y");

    assert!(backend.renew().await.is_err());
}
