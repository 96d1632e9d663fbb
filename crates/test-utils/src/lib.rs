pub mod builders;
pub mod fake_executor;

use std::sync::{Arc, Mutex, Once};

use countdag::dag::{RunReport, Scheduler};
use countdag::engine::{CoreRuntime, Runtime, RuntimeEvent};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::fake_executor::{FakeExecutor, Submission};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Run `scheduler` to completion against a [`FakeExecutor`] configured by
/// `script`. Returns the report and every submitted attempt, in order.
pub async fn run_with_fake<F>(scheduler: Scheduler, script: F) -> (RunReport, Vec<Submission>)
where
    F: FnOnce(FakeExecutor) -> FakeExecutor,
{
    let (tx, rx) = mpsc::channel::<RuntimeEvent>(256);
    let submitted = Arc::new(Mutex::new(Vec::new()));
    let executor = script(FakeExecutor::new(tx, Arc::clone(&submitted)));

    let runtime = Runtime::new(CoreRuntime::new(scheduler), rx, executor);
    let report = with_timeout(runtime.run())
        .await
        .expect("runtime returned an error");

    let submitted = submitted.lock().unwrap().clone();
    (report, submitted)
}
