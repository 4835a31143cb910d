//! End-to-end tests over a real listener: SSE framing, snapshot-then-live
//! ordering, chat relay, and disconnect behavior.

use std::sync::Arc;
use std::time::Duration;

use pulse_core::ids::AccountId;
use pulse_server::{start, ServerConfig};
use pulse_store::accounts::AccountRepo;
use pulse_store::transactions::{Direction, TransactionRepo, TransactionStatus};
use pulse_store::{ChangeFeed, Database};

struct Harness {
    port: u16,
    accounts: AccountRepo,
    transactions: TransactionRepo,
    _handle: pulse_server::ServerHandle,
}

async fn harness() -> Harness {
    harness_with(|_| {}).await
}

/// Start a server on a random port, with a hook to corrupt the database
/// before it comes up.
async fn harness_with(prepare: impl FnOnce(&Database)) -> Harness {
    let db = Database::in_memory().unwrap();
    let feed = Arc::new(ChangeFeed::new(64));
    prepare(&db);

    let accounts = AccountRepo::new(db.clone(), Arc::clone(&feed));
    let transactions = TransactionRepo::new(db.clone(), Arc::clone(&feed));

    let handle = start(
        ServerConfig {
            port: 0,
            ..Default::default()
        },
        db,
        feed,
    )
    .await
    .unwrap();

    Harness {
        port: handle.port,
        accounts,
        transactions,
        _handle: handle,
    }
}

async fn open_stream(port: u16) -> reqwest::Response {
    let resp = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{port}/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"), "got: {content_type}");
    resp
}

/// Read one `data:` frame, skipping keep-alive comments.
async fn next_frame(resp: &mut reqwest::Response, buf: &mut String) -> serde_json::Value {
    loop {
        if let Some(idx) = buf.find("\n\n") {
            let raw = buf[..idx].to_string();
            buf.drain(..idx + 2);

            let mut data = String::new();
            for line in raw.lines() {
                if let Some(rest) = line.strip_prefix("data: ") {
                    data.push_str(rest);
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data.push_str(rest);
                }
            }
            if data.is_empty() {
                continue; // comment or empty frame
            }
            return serde_json::from_str(&data).unwrap();
        }

        let chunk = tokio::time::timeout(Duration::from_secs(5), resp.chunk())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .expect("stream ended unexpectedly");
        buf.push_str(std::str::from_utf8(&chunk).unwrap());
    }
}

async fn client_count(port: u16) -> usize {
    let body: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["clients"].as_u64().unwrap() as usize
}

async fn wait_for_client_count(port: u16, expected: usize) {
    for _ in 0..100 {
        if client_count(port).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("client count never reached {expected}");
}

#[tokio::test]
async fn snapshot_then_live_updates() {
    let h = harness().await;
    let account = h.accounts.create("mira").unwrap();
    let txn = h
        .transactions
        .create(&account.id, None, 5_000, Direction::Credit)
        .unwrap();

    let mut resp = open_stream(h.port).await;
    let mut buf = String::new();

    let first = next_frame(&mut resp, &mut buf).await;
    assert_eq!(first["event"], "initial_transactions");
    let snapshot = first["payload"].as_array().unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0]["id"], txn.id.as_str());
    assert_eq!(snapshot[0]["status"], "pending");

    h.transactions
        .update_status(&txn.id, TransactionStatus::Successful)
        .unwrap();

    let second = next_frame(&mut resp, &mut buf).await;
    assert_eq!(second["event"], "transaction_update");
    assert_eq!(second["payload"]["operation"], "update");
    assert_eq!(second["payload"]["document"]["status"], "successful");
}

#[tokio::test]
async fn snapshot_is_newest_first() {
    let h = harness().await;
    let account = h.accounts.create("mira").unwrap();
    let old = h
        .transactions
        .create(&account.id, None, 100, Direction::Credit)
        .unwrap();
    let new = h
        .transactions
        .create(&account.id, None, 200, Direction::Credit)
        .unwrap();

    let mut resp = open_stream(h.port).await;
    let mut buf = String::new();

    let first = next_frame(&mut resp, &mut buf).await;
    let snapshot = first["payload"].as_array().unwrap();
    assert_eq!(snapshot[0]["id"], new.id.as_str());
    assert_eq!(snapshot[1]["id"], old.id.as_str());
}

#[tokio::test]
async fn account_changes_reach_the_stream() {
    let h = harness().await;
    let account = h.accounts.create("mira").unwrap();

    let mut resp = open_stream(h.port).await;
    let mut buf = String::new();
    let _snapshot = next_frame(&mut resp, &mut buf).await;

    h.accounts.update_balance(&account.id, 7_500).unwrap();

    let frame = next_frame(&mut resp, &mut buf).await;
    assert_eq!(frame["event"], "users_updated");
    assert_eq!(frame["payload"]["document"]["balance_cents"], 7_500);
}

#[tokio::test]
async fn chat_roundtrip_over_http() {
    let h = harness().await;
    let account_id = AccountId::new();

    let mut resp = open_stream(h.port).await;
    let mut buf = String::new();
    let _snapshot = next_frame(&mut resp, &mut buf).await;

    let client = reqwest::Client::new();
    let url = format!(
        "http://127.0.0.1:{}/chat/{}/messages",
        h.port,
        account_id.as_str()
    );

    let sent: serde_json::Value = client
        .post(&url)
        .json(&serde_json::json!({"sender": "user", "body": "my deposit is stuck"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sent["body"], "my deposit is stuck");
    assert_eq!(sent["seen"], false);

    // The send shows up on the shared stream, tagged as chat
    let frame = next_frame(&mut resp, &mut buf).await;
    assert_eq!(frame["event"], "chat_message");
    assert_eq!(frame["payload"]["body"], "my deposit is stuck");
    assert_eq!(frame["payload"]["account_id"], account_id.as_str());

    // And in history, chronological
    client
        .post(&url)
        .json(&serde_json::json!({"sender": "agent", "body": "on it"}))
        .send()
        .await
        .unwrap();

    let history: Vec<serde_json::Value> =
        client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["body"], "my deposit is stuck");
    assert_eq!(history[1]["body"], "on it");
}

#[tokio::test]
async fn disconnected_client_is_removed_and_misses_events() {
    let h = harness().await;
    let account = h.accounts.create("mira").unwrap();
    let txn = h
        .transactions
        .create(&account.id, None, 1_000, Direction::Credit)
        .unwrap();

    // A connects and sees the snapshot
    let mut resp_a = open_stream(h.port).await;
    let mut buf_a = String::new();
    let first_a = next_frame(&mut resp_a, &mut buf_a).await;
    assert_eq!(first_a["event"], "initial_transactions");
    assert_eq!(first_a["payload"].as_array().unwrap().len(), 1);

    // B connects, then drops before any broadcast
    let resp_b = open_stream(h.port).await;
    // C connects
    let mut resp_c = open_stream(h.port).await;
    let mut buf_c = String::new();
    let _ = next_frame(&mut resp_c, &mut buf_c).await;

    wait_for_client_count(h.port, 3).await;
    drop(resp_b);
    wait_for_client_count(h.port, 2).await;

    // The settlement lands on the two remaining streams
    h.transactions
        .update_status(&txn.id, TransactionStatus::Successful)
        .unwrap();

    let update_a = next_frame(&mut resp_a, &mut buf_a).await;
    assert_eq!(update_a["event"], "transaction_update");
    assert_eq!(update_a["payload"]["document"]["id"], txn.id.as_str());

    let update_c = next_frame(&mut resp_c, &mut buf_c).await;
    assert_eq!(update_c["event"], "transaction_update");
}

#[tokio::test]
async fn snapshot_failure_still_serves_live_events() {
    // Snapshot query has no table to read; stream must come up anyway
    let h = harness_with(|db| {
        db.with_conn(|conn| {
            conn.execute("DROP TABLE transactions", [])
                .map_err(pulse_store::StoreError::from)?;
            Ok(())
        })
        .unwrap();
    })
    .await;

    let mut resp = open_stream(h.port).await;
    let mut buf = String::new();

    // No snapshot frame; the first thing to arrive is the live chat event
    let client = reqwest::Client::new();
    let account_id = AccountId::new();
    client
        .post(format!(
            "http://127.0.0.1:{}/chat/{}/messages",
            h.port,
            account_id.as_str()
        ))
        .json(&serde_json::json!({"sender": "agent", "body": "still alive"}))
        .send()
        .await
        .unwrap();

    let frame = next_frame(&mut resp, &mut buf).await;
    assert_eq!(frame["event"], "chat_message");
    assert_eq!(frame["payload"]["body"], "still alive");
}

#[tokio::test]
async fn history_of_unknown_conversation_is_empty() {
    let h = harness().await;
    let history: Vec<serde_json::Value> = reqwest::get(format!(
        "http://127.0.0.1:{}/chat/{}/messages",
        h.port,
        AccountId::new().as_str()
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert!(history.is_empty());
}
