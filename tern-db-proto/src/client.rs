//! Async RPC client
//!
//! Maintains a bounded table of in-flight calls keyed by sequence number.
//! Requests acquire a call slot (blocking when all are busy), send a frame,
//! and await the response routed back by the reader task. A deadline
//! sweeper with granular sleeps expires overdue calls with `Timeout`, so a
//! stalled writer can never stall timeout delivery. Reconnects bump an
//! epoch: responses from a previous connection are never delivered.

use crate::args::{decode_response, encode_request, Arg, CallContext};
use crate::error::{ProtoError, Result};
use crate::frame::{decode_frame, encode_frame, Cmd};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, warn};

/// Frame-level transport; implementations own the socket
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: Bytes) -> Result<()>;
    /// Next inbound frame; an error ends the connection
    async fn recv(&self) -> Result<Bytes>;
}

/// Client settings
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// In-flight call bound; further calls wait for a slot
    pub max_parallel_calls: usize,
    /// Default per-call deadline
    pub net_timeout: Duration,
    /// Deadline sweeper granularity
    pub deadline_check_interval: Duration,
    pub expected_cluster_id: Option<i64>,
    pub app_name: String,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            max_parallel_calls: 32,
            net_timeout: Duration::from_secs(10),
            deadline_check_interval: Duration::from_millis(20),
            expected_cluster_id: None,
            app_name: "tern-db-client".to_string(),
        }
    }
}

struct CallSlot {
    tx: oneshot::Sender<Result<Vec<Arg>>>,
    deadline: Instant,
    epoch: u64,
}

struct Inner {
    transport: Arc<dyn Transport>,
    slots: Mutex<FxHashMap<u32, CallSlot>>,
    permits: Semaphore,
    next_seq: AtomicU32,
    epoch: AtomicU64,
    cfg: RpcClientConfig,
}

impl Inner {
    fn fail_all(&self, make_err: impl Fn() -> ProtoError) {
        let drained: Vec<CallSlot> = {
            let mut slots = self.slots.lock();
            slots.drain().map(|(_, s)| s).collect()
        };
        for slot in drained {
            let _ = slot.tx.send(Err(make_err()));
        }
    }
}

/// RPC client over an abstract transport
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl RpcClient {
    /// Wrap a connected transport and start the reader and deadline tasks
    pub fn start(transport: Arc<dyn Transport>, cfg: RpcClientConfig) -> Self {
        let inner = Arc::new(Inner {
            transport,
            slots: Mutex::new(FxHashMap::default()),
            permits: Semaphore::new(cfg.max_parallel_calls),
            next_seq: AtomicU32::new(0),
            epoch: AtomicU64::new(0),
            cfg,
        });

        // reader: routes responses by sequence number
        {
            let weak = Arc::downgrade(&inner);
            tokio::spawn(async move {
                reader_loop(weak).await;
            });
        }
        // deadline sweeper: granular sleeps, independent of the writer
        {
            let weak = Arc::downgrade(&inner);
            tokio::spawn(async move {
                sweeper_loop(weak).await;
            });
        }
        Self { inner }
    }

    /// Issue one call and await its response
    pub async fn call(&self, cmd: Cmd, args: Vec<Arg>, timeout: Option<Duration>) -> Result<Vec<Arg>> {
        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| ProtoError::Cancelled("client closed".into()))?;
        let timeout = timeout.unwrap_or(self.inner.cfg.net_timeout);
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let epoch = self.inner.epoch.load(Ordering::Acquire);
        let (tx, rx) = oneshot::channel();
        self.inner.slots.lock().insert(
            seq,
            CallSlot {
                tx,
                deadline: Instant::now() + timeout,
                epoch,
            },
        );

        let ctx = CallContext {
            exec_timeout_ms: timeout.as_millis() as i64,
            ..Default::default()
        };
        let frame = encode_frame(cmd as u8, seq, &encode_request(&args, &ctx));
        if let Err(e) = self.inner.transport.send(frame).await {
            self.inner.slots.lock().remove(&seq);
            return Err(e);
        }
        debug!(seq, cmd = ?cmd, "rpc call sent");

        match rx.await {
            Ok(res) => res,
            Err(_) => Err(ProtoError::Cancelled("call slot dropped".into())),
        }
    }

    /// Login flow: must be the first call on a fresh connection
    pub async fn login(&self, user: &str, password: &str, db: &str) -> Result<Vec<Arg>> {
        let cfg = &self.inner.cfg;
        let args = vec![
            Arg::Str(user.to_string()),
            Arg::Str(password.to_string()),
            Arg::Str(db.to_string()),
            Arg::Bool(false), // create_db
            Arg::Bool(cfg.expected_cluster_id.is_some()),
            Arg::Varint(cfg.expected_cluster_id.unwrap_or(-1)),
            Arg::Str(crate::frame::PROTO_VERSION.to_string()),
            Arg::Str(cfg.app_name.clone()),
        ];
        self.call(Cmd::Login, args, None).await
    }

    /// Mark a reconnect: every pending call fails with `Cancelled` and
    /// responses from the previous connection are never delivered
    pub fn on_reconnect(&self) {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        self.inner
            .fail_all(|| ProtoError::Cancelled("connection was re-established".into()));
    }

    /// In-flight call count (test/diagnostic hook)
    pub fn pending_calls(&self) -> usize {
        self.inner.slots.lock().len()
    }
}

async fn reader_loop(weak: Weak<Inner>) {
    loop {
        let Some(inner) = weak.upgrade() else { return };
        let frame = match inner.transport.recv().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(err = %e, "rpc transport closed");
                inner.fail_all(|| ProtoError::Network("connection lost".into()));
                return;
            }
        };
        let current_epoch = inner.epoch.load(Ordering::Acquire);
        match decode_frame(frame) {
            Ok((header, body)) => {
                let slot = {
                    let mut slots = inner.slots.lock();
                    let epoch_ok = slots.get(&header.seq).map(|s| s.epoch == current_epoch);
                    match epoch_ok {
                        Some(true) => slots.remove(&header.seq),
                        // stale epoch: a response from before a reconnect
                        Some(false) => {
                            slots.remove(&header.seq);
                            None
                        }
                        None => None,
                    }
                };
                match slot {
                    Some(slot) => {
                        let _ = slot.tx.send(decode_response(body));
                    }
                    None => {
                        debug!(seq = header.seq, "dropping unmatched response");
                    }
                }
            }
            Err(e) => {
                warn!(err = %e, "undecodable frame");
            }
        }
    }
}

async fn sweeper_loop(weak: Weak<Inner>) {
    loop {
        let interval = {
            let Some(inner) = weak.upgrade() else { return };
            let now = Instant::now();
            let expired: Vec<CallSlot> = {
                let mut slots = inner.slots.lock();
                let seqs: Vec<u32> = slots
                    .iter()
                    .filter(|(_, s)| s.deadline <= now)
                    .map(|(&seq, _)| seq)
                    .collect();
                seqs.into_iter().filter_map(|s| slots.remove(&s)).collect()
            };
            for slot in expired {
                let _ = slot
                    .tx
                    .send(Err(ProtoError::Timeout("call deadline exceeded".into())));
            }
            inner.cfg.deadline_check_interval
        };
        tokio::time::sleep(interval).await;
    }
}
