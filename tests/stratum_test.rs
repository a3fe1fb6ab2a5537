// TOS Miner - Free and Open Source Software Statement
//
// This project, tosminer, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: tests/stratum_test.rs
// Version: 0.3.1
//
// This file contains loopback integration tests for the stratum client,
// located in the tests directory. A minimal in-process pool drives the
// subscribe/authorize handshake, publishes a job and checks the exact
// submit framing on the wire.
//
// Tree Location:
// - tests/stratum_test.rs (pool client integration tests)
// - Depends on: tosminer, tokio, serde_json

use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tosminer::core::types::Solution;
use tosminer::pool::{PoolEvent, StratumClient};

async fn recv_json(
    lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
) -> Value {
    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("timed out waiting for client message")
        .expect("read error")
        .expect("connection closed");
    serde_json::from_str(&line).expect("client sent invalid JSON")
}

async fn send_json(writer: &mut tokio::net::tcp::OwnedWriteHalf, value: Value) {
    writer
        .write_all(format!("{}\n", value).as_bytes())
        .await
        .expect("server write failed");
}

#[tokio::test]
async fn handshake_job_and_submit_framing() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Minimal pool: subscribe -> authorize -> notify, then one submit
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let subscribe = recv_json(&mut lines).await;
        assert_eq!(subscribe["method"], "mining.subscribe");
        assert!(subscribe["params"][0]
            .as_str()
            .unwrap()
            .starts_with("tosminer/"));
        send_json(
            &mut writer,
            json!({
                "id": subscribe["id"],
                "result": [[["mining.notify", "sess-1"]], "01000000", 4],
                "error": null
            }),
        )
        .await;

        let authorize = recv_json(&mut lines).await;
        assert_eq!(authorize["method"], "mining.authorize");
        assert_eq!(authorize["params"], json!(["wallet.rig", "x"]));
        send_json(
            &mut writer,
            json!({ "id": authorize["id"], "result": true, "error": null }),
        )
        .await;

        // Job with an explicit pool target
        send_json(
            &mut writer,
            json!({
                "id": null,
                "method": "mining.notify",
                "params": ["job-1", "00".repeat(112), "ff".repeat(32), 42, true]
            }),
        )
        .await;

        // Exactly one mining.submit line must arrive for the solution
        let submit = recv_json(&mut lines).await;
        assert_eq!(submit["method"], "mining.submit");
        let params = submit["params"].as_array().unwrap();
        assert_eq!(params[0], "wallet.rig");
        assert_eq!(params[1], "job-1");
        // extranonce2: (nonce - start_nonce) = 0xA1B2, little-endian, 4 bytes
        assert_eq!(params[2], "b2a10000");
        // nonce: big-endian hex of start_nonce(1) + 0xA1B2
        assert_eq!(params[3], "000000000000a1b3");
        send_json(
            &mut writer,
            json!({ "id": submit["id"], "result": true, "error": null }),
        )
        .await;

        // Hold the socket open until the client disconnects
        let _ = lines.next_line().await;
    });

    let client = StratumClient::new();
    client.set_credentials("wallet.rig", "x");
    client
        .add_endpoint_url(&format!("stratum+tcp://127.0.0.1:{}", port))
        .unwrap();

    let (work_tx, mut work_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    client.set_work_sender(work_tx);
    client.set_event_sender(event_tx);

    let runner = {
        let client = client.clone();
        tokio::spawn(async move {
            let _ = client.run().await;
        })
    };

    let work = tokio::time::timeout(Duration::from_secs(5), work_rx.recv())
        .await
        .expect("no work received")
        .expect("work channel closed");

    assert_eq!(work.job_id, "job-1");
    assert_eq!(work.height, 42);
    // extranonce1 "01000000" little-endian = 1
    assert_eq!(work.start_nonce, 1);
    assert_eq!(work.extranonce2_size, 4);
    assert_eq!(work.target, [0xFF; 32]);
    assert!(client.is_authorized());

    // Submit a solution from the upper part of the job's range
    let solution = Solution::new(work.start_nonce + 0xA1B2, [0u8; 32], 0);
    client.submit_solution(&solution, &work.job_id).await;

    // Connected, then the accept for our share
    let mut accepted = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_secs(5), event_rx.recv()).await
    {
        match event {
            PoolEvent::ShareAccepted => {
                accepted = true;
                break;
            }
            PoolEvent::ShareRejected { reason } => panic!("share rejected: {}", reason),
            _ => {}
        }
    }
    assert!(accepted, "no accept event for the submitted share");
    assert_eq!(client.accepted_shares(), 1);
    assert_eq!(client.pending_request_count(), 0);

    client.disconnect();
    runner.abort();
    server.abort();
}

#[tokio::test]
async fn submit_while_unauthorized_is_dropped() {
    let client = StratumClient::new();
    client.set_credentials("wallet.rig", "x");

    let solution = Solution::new(7, [0u8; 32], 0);
    client.submit_solution(&solution, "job-x").await;

    assert_eq!(client.pending_request_count(), 0);
    assert_eq!(client.accepted_shares(), 0);
    assert_eq!(client.rejected_shares(), 0);
}

#[tokio::test]
async fn rejected_share_counts_and_surfaces_reason() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let subscribe = recv_json(&mut lines).await;
        send_json(
            &mut writer,
            json!({
                "id": subscribe["id"],
                "result": [[["mining.notify", "s"]], "00000000", 4],
                "error": null
            }),
        )
        .await;

        let authorize = recv_json(&mut lines).await;
        send_json(
            &mut writer,
            json!({ "id": authorize["id"], "result": true, "error": null }),
        )
        .await;

        send_json(
            &mut writer,
            json!({
                "id": null,
                "method": "mining.notify",
                "params": ["job-2", "00".repeat(112), "ff".repeat(32), 1, true]
            }),
        )
        .await;

        let submit = recv_json(&mut lines).await;
        send_json(
            &mut writer,
            json!({
                "id": submit["id"],
                "result": null,
                "error": [21, "stale share", null]
            }),
        )
        .await;

        let _ = lines.next_line().await;
    });

    let client = StratumClient::new();
    client.set_credentials("wallet.rig", "x");
    client
        .add_endpoint_url(&format!("stratum+tcp://127.0.0.1:{}", port))
        .unwrap();

    let (work_tx, mut work_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    client.set_work_sender(work_tx);
    client.set_event_sender(event_tx);

    let runner = {
        let client = client.clone();
        tokio::spawn(async move {
            let _ = client.run().await;
        })
    };

    let work = tokio::time::timeout(Duration::from_secs(5), work_rx.recv())
        .await
        .unwrap()
        .unwrap();

    client
        .submit_solution(&Solution::new(work.start_nonce + 1, [0u8; 32], 0), &work.job_id)
        .await;

    let mut reason = None;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_secs(5), event_rx.recv()).await
    {
        if let PoolEvent::ShareRejected { reason: r } = event {
            reason = Some(r);
            break;
        }
    }
    assert_eq!(reason.as_deref(), Some("stale share"));
    assert_eq!(client.rejected_shares(), 1);
    assert_eq!(client.accepted_shares(), 0);

    client.disconnect();
    runner.abort();
    server.abort();
}

#[tokio::test]
async fn oversized_line_terminates_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        // Answer the subscribe, then flood a line far past the ceiling
        let subscribe = recv_json(&mut lines).await;
        send_json(
            &mut writer,
            json!({
                "id": subscribe["id"],
                "result": [[["mining.notify", "s"]], "00", 4],
                "error": null
            }),
        )
        .await;

        let garbage = vec![b'a'; 64 * 1024];
        let _ = writer.write_all(&garbage).await;
        let _ = writer.flush().await;
        let _ = lines.next_line().await;
    });

    let client = StratumClient::new();
    client.set_credentials("wallet.rig", "x");
    client
        .add_endpoint_url(&format!("stratum+tcp://127.0.0.1:{}", port))
        .unwrap();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    client.set_event_sender(event_tx);

    let runner = {
        let client = client.clone();
        tokio::spawn(async move {
            let _ = client.run().await;
        })
    };

    // Connected first, then the overflow forces a disconnect
    let mut saw_connected = false;
    let mut saw_disconnected = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_secs(5), event_rx.recv()).await
    {
        match event {
            PoolEvent::Connected => saw_connected = true,
            PoolEvent::Disconnected => {
                saw_disconnected = true;
                break;
            }
            _ => {}
        }
    }
    assert!(saw_connected);
    assert!(saw_disconnected, "line overflow must tear the connection down");

    client.disconnect();
    runner.abort();
    server.abort();
}
