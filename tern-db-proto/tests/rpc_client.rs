//! RPC client behavior over a loopback transport

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tern_db_proto::{
    decode_frame, encode_frame, encode_response, Arg, Cmd, ProtoError, RpcClient, RpcClientConfig,
    Transport,
};
use tokio::sync::{mpsc, Mutex};

/// Loopback transport: outbound frames land in a server-side queue, the
/// client reads from an inbound queue.
struct Loopback {
    to_server: mpsc::UnboundedSender<Bytes>,
    from_server: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

fn loopback() -> (
    Arc<Loopback>,
    mpsc::UnboundedReceiver<Bytes>,
    mpsc::UnboundedSender<Bytes>,
) {
    let (tx_req, rx_req) = mpsc::unbounded_channel();
    let (tx_resp, rx_resp) = mpsc::unbounded_channel();
    (
        Arc::new(Loopback {
            to_server: tx_req,
            from_server: Mutex::new(rx_resp),
        }),
        rx_req,
        tx_resp,
    )
}

#[async_trait]
impl Transport for Loopback {
    async fn send(&self, frame: Bytes) -> tern_db_proto::Result<()> {
        self.to_server
            .send(frame)
            .map_err(|_| ProtoError::Network("peer gone".into()))
    }

    async fn recv(&self) -> tern_db_proto::Result<Bytes> {
        self.from_server
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| ProtoError::Network("closed".into()))
    }
}

fn cfg() -> RpcClientConfig {
    RpcClientConfig {
        net_timeout: Duration::from_millis(50),
        deadline_check_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

/// Echo server: answers every request with its own seq and one varint arg
fn spawn_echo_server(
    mut rx_req: mpsc::UnboundedReceiver<Bytes>,
    tx_resp: mpsc::UnboundedSender<Bytes>,
) {
    tokio::spawn(async move {
        while let Some(frame) = rx_req.recv().await {
            let (header, _) = decode_frame(frame).unwrap();
            let body = encode_response(None, &[Arg::Varint(i64::from(header.seq))]);
            let _ = tx_resp.send(encode_frame(header.cmd, header.seq, &body));
        }
    });
}

#[tokio::test]
async fn responses_route_by_sequence_number() {
    let (transport, rx_req, tx_resp) = loopback();
    spawn_echo_server(rx_req, tx_resp);
    let client = RpcClient::start(transport, cfg());

    // several concurrent calls each get their own response back
    let mut handles = Vec::new();
    let client = Arc::new(client);
    for _ in 0..8 {
        let c = client.clone();
        handles.push(tokio::spawn(async move {
            c.call(Cmd::Ping, vec![], None).await.unwrap()
        }));
    }
    let mut seen = Vec::new();
    for h in handles {
        let args = h.await.unwrap();
        seen.push(args[0].as_i64().unwrap());
    }
    seen.sort_unstable();
    assert_eq!(seen, (0..8).collect::<Vec<i64>>());
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn timeout_releases_slot_and_next_call_succeeds() {
    let (transport, mut rx_req, tx_resp) = loopback();
    let client = RpcClient::start(transport, cfg());

    // server swallows the first request, answers later ones
    let silent_then_echo = tokio::spawn(async move {
        let first = rx_req.recv().await.unwrap();
        drop(first);
        while let Some(frame) = rx_req.recv().await {
            let (header, _) = decode_frame(frame).unwrap();
            let body = encode_response(None, &[Arg::Bool(true)]);
            let _ = tx_resp.send(encode_frame(header.cmd, header.seq, &body));
        }
    });

    let started = Instant::now();
    let err = client
        .call(Cmd::Ping, vec![], Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtoError::Timeout(_)));
    // timeout plus one deadline-check interval, with slack
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(client.pending_calls(), 0);

    // a subsequent call on a fresh seq succeeds
    let args = client.call(Cmd::Ping, vec![], None).await.unwrap();
    assert_eq!(args, vec![Arg::Bool(true)]);
    silent_then_echo.abort();
}

#[tokio::test]
async fn reconnect_drops_stale_responses() {
    let (transport, mut rx_req, tx_resp) = loopback();
    let client = Arc::new(RpcClient::start(transport, cfg()));

    let call = {
        let c = client.clone();
        tokio::spawn(async move { c.call(Cmd::Ping, vec![], Some(Duration::from_secs(5))).await })
    };
    // the server receives the request but withholds the answer
    let req_frame = rx_req.recv().await.unwrap();
    let (header, _) = decode_frame(req_frame).unwrap();

    // reconnect: the pending call fails with Cancelled
    tokio::time::sleep(Duration::from_millis(10)).await;
    client.on_reconnect();
    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, ProtoError::Cancelled(_)));

    // the late response for the pre-reconnect seq is delivered to nobody
    let body = encode_response(None, &[Arg::Bool(true)]);
    tx_resp
        .send(encode_frame(header.cmd, header.seq, &body))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.pending_calls(), 0);

    // fresh calls after the reconnect work with new sequence numbers
    spawn_echo_server(rx_req, tx_resp);
    let args = client.call(Cmd::Ping, vec![], None).await.unwrap();
    assert_eq!(args[0].as_i64(), Some(1));
}
