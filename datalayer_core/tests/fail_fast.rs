//! The default failure policy ends the process, so each case re-runs this
//! test binary as a child and checks the exit status it leaves behind.

use std::process::Command;
use std::sync::Arc;

use datalayer_core::{ConnectOptions, ConnectionEvent, DataLayer};
use tokio::time::{sleep, Duration};

mod common;
use common::{fake_store::FakeStore, init_test_logging};

/// Set in the child; names the event it should emit.
const CHILD_EVENT: &str = "DATALAYER_FAIL_FAST_EVENT";

/// Only does work inside a child started by `exit_status_after`.
#[tokio::test]
async fn fault_under_default_policy() {
    let Ok(event) = std::env::var(CHILD_EVENT) else {
        return;
    };
    init_test_logging();

    let store = Arc::new(FakeStore::new("H1").with_events());
    let data_layer = DataLayer::new(ConnectOptions::default(), store.clone());
    data_layer.acquire().await.expect("acquire should succeed");

    let event = match event.as_str() {
        "error" => ConnectionEvent::Error("socket reset".into()),
        "close" => ConnectionEvent::Close,
        "timeout" => ConnectionEvent::Timeout,
        other => panic!("unknown event {other:?}"),
    };
    assert_eq!(store.connection().emit(event), 1);

    // The monitor exits the process; reaching the end is a failure.
    sleep(Duration::from_secs(5)).await;
    panic!("the process should have exited");
}

fn exit_status_after(event: &str) -> anyhow::Result<Option<i32>> {
    let status = Command::new(std::env::current_exe()?)
        .args(["--exact", "fault_under_default_policy", "--test-threads=1"])
        .env(CHILD_EVENT, event)
        .status()?;
    Ok(status.code())
}

#[test]
fn faults_end_the_process_with_their_kind_code() -> anyhow::Result<()> {
    assert_eq!(exit_status_after("error")?, Some(1));
    assert_eq!(exit_status_after("close")?, Some(2));
    assert_eq!(exit_status_after("timeout")?, Some(3));
    Ok(())
}
