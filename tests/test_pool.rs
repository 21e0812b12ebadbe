use beacon::server::{WorkerCommand, WorkerPool};

#[tokio::test]
async fn test_pool_waits_for_every_worker() {
    let pool = WorkerPool::new(WorkerCommand::new("true"), 3);

    assert!(pool.run().await.is_ok());
}

#[tokio::test]
async fn test_failing_worker_fails_the_pool() {
    let pool = WorkerPool::new(WorkerCommand::new("false"), 2);

    let err = pool.run().await.unwrap_err();
    assert!(err.to_string().contains("2 of 2 workers failed"));
}

#[tokio::test]
async fn test_worker_receives_its_id() {
    // `sh -c <script> <name> --worker-id N` binds $1/$2 to the appended flag.
    let command = WorkerCommand::new("sh")
        .arg("-c")
        .arg(r#"[ "$1" = "--worker-id" ] && [ "$2" -lt 2 ]"#)
        .arg("worker");
    let pool = WorkerPool::new(command, 2);

    assert!(pool.run().await.is_ok());
}

#[tokio::test]
async fn test_missing_program_is_an_error() {
    let pool = WorkerPool::new(WorkerCommand::new("/nonexistent/beacon-worker"), 2);

    assert!(pool.run().await.is_err());
}
