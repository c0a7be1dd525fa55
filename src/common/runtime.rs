use std::time::Duration;
use tokio::runtime::Runtime;

pub(crate) async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    tokio::time::sleep(duration).await
}

pub(crate) fn new(worker_threads: usize, blocking_threads: usize) -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads.max(1))
        .max_blocking_threads(blocking_threads.max(1)) // This is a maximum
        .thread_name("httpstub-worker")
        .enable_all()
        .build()
}
