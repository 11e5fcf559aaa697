use chrono::Utc;
use lrs_forwarder::buffer::Queue;
use lrs_forwarder::domain::{Batch, DeliveryOutcome, Statement, statements_to_json};
use lrs_forwarder::store::{Store, StoreConfig};
use std::time::Duration;
use tempfile::TempDir;

fn config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        path: dir.path().join("store"),
        flush_every_ms: None,
    }
}

fn statement(n: u32) -> Statement {
    Statement::from_json(&format!(r#"{{"id":"stmt-{n}","verb":{{"id":"v"}}}}"#)).unwrap()
}

#[tokio::test]
async fn test_queued_statements_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();

    {
        let store = Store::open(&config(&temp_dir)).unwrap();
        let queue = store.statement_queue().unwrap();
        for n in 0..3 {
            queue.push(&statement(n)).unwrap();
        }
        store.flush().await.unwrap();
    }

    let store = Store::open(&config(&temp_dir)).unwrap();
    let queue = store.statement_queue().unwrap();
    assert_eq!(queue.depth().unwrap(), 3);

    // FIFO order is kept across restarts
    let first = queue.claim(Duration::from_secs(60)).unwrap().unwrap();
    assert_eq!(first.data.as_json(), statement(0).as_json());
}

#[tokio::test]
async fn test_claim_lease_outlives_restart() {
    let temp_dir = TempDir::new().unwrap();

    {
        let store = Store::open(&config(&temp_dir)).unwrap();
        let batches = store.batch_queue().unwrap();
        let batch = Batch::new(vec![statement(1), statement(2)]).unwrap();
        batches.push(&batch).unwrap();
        assert!(batches.claim(Duration::from_millis(200)).unwrap().is_some());
        store.flush().await.unwrap();
    }

    let store = Store::open(&config(&temp_dir)).unwrap();
    let batches = store.batch_queue().unwrap();
    assert_eq!(batches.depth().unwrap(), 1);
    assert!(batches.claim(Duration::from_secs(60)).unwrap().is_none());

    // a crashed worker's batch becomes claimable once the lease lapses
    tokio::time::sleep(Duration::from_millis(300)).await;
    let item = batches.claim(Duration::from_secs(60)).unwrap().unwrap();
    assert_eq!(item.data.size(), 2);
}

#[tokio::test]
async fn test_outcome_log_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let statements = [statement(7)];

    {
        let store = Store::open(&config(&temp_dir)).unwrap();
        let log = store.outcome_log().unwrap();
        log.append_statement(&DeliveryOutcome::accepted(200, "OK", 5).to_log_entry(Utc::now()))
            .unwrap();
        let dropped = DeliveryOutcome::dropped(
            Some(400),
            "Bad Request",
            "Client error",
            statements.len(),
            statements_to_json(&statements).unwrap(),
        );
        log.append_statement(&dropped.to_log_entry(Utc::now()))
            .unwrap();
        store.flush().await.unwrap();
    }

    let store = Store::open(&config(&temp_dir)).unwrap();
    let log = store.outcome_log().unwrap();
    let entries = log.statement_entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].code, Some(200));
    assert_eq!(entries[1].code, Some(400));
    assert_eq!(
        entries[1].data.as_deref(),
        Some(format!("[{}]", statement(7).as_json()).as_str())
    );
}
