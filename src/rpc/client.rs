use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{mpsc, oneshot},
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::rpc::{
    error::RpcError,
    message::{Request, Response, Status},
    wire,
};

/// Multiplexing client over one replica connection.
///
/// Many callers may [`call`](RpcClient::call) concurrently; a send loop
/// serializes outgoing frames and a receive loop routes each response to
/// the pending call with the matching correlation id. All id and pending
/// state is owned by this instance, so one process can hold independent
/// clients to several replicas.
#[derive(Debug)]
pub struct RpcClient {
    /// In-flight calls: correlation id -> single-use delivery channel.
    /// Entries are inserted before the request is enqueued and removed
    /// exactly once, by delivery or by timeout.
    pending: DashMap<u64, oneshot::Sender<Response>>,
    /// Sequence id source; strictly increasing, never reused, never 0.
    seq: AtomicU64,
    requests: mpsc::Sender<Request>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl RpcClient {
    /// Connect to a replica and start the connection loops.
    pub async fn connect(
        addr: &str,
        timeout: Duration,
        queue_depth: usize,
    ) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("cannot connect to replica at {addr}"))?;
        Ok(Self::new(stream, timeout, queue_depth))
    }

    /// Wrap an established connection. `queue_depth` bounds the send
    /// queue; a full queue blocks callers in [`call`](RpcClient::call).
    pub fn new(stream: TcpStream, timeout: Duration, queue_depth: usize) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        let (requests_tx, requests_rx) = mpsc::channel(queue_depth);

        let client = Arc::new(Self {
            pending: DashMap::new(),
            seq: AtomicU64::new(0),
            requests: requests_tx,
            timeout,
            cancel: CancellationToken::new(),
        });

        tokio::spawn(send_loop(write_half, requests_rx, client.cancel.clone()));
        tokio::spawn(receive_loop(read_half, Arc::clone(&client)));

        client
    }

    /// Issue one request and wait for its correlated response.
    ///
    /// The caller-supplied `id` is overwritten with the next sequence id.
    /// An error status from the replica surfaces as [`RpcError::Remote`];
    /// a missing response surfaces as [`RpcError::CallTimeout`] after the
    /// configured window, and a response arriving later is dropped by the
    /// receive loop.
    pub async fn call(&self, mut request: Request) -> Result<Response, RpcError> {
        let id = self.next_id();
        request.id = id;

        let (delivery_tx, delivery_rx) = oneshot::channel();
        self.pending.insert(id, delivery_tx);

        if self.requests.send(request).await.is_err() {
            self.pending.remove(&id);
            return Err(RpcError::SendQueueClosed);
        }

        tokio::select! {
            delivered = delivery_rx => match delivered {
                Ok(response) => match response.status {
                    Status::Good => Ok(response),
                    Status::Error(message) => Err(RpcError::Remote(message)),
                },
                // The client was closed with this call in flight.
                Err(_) => Err(RpcError::ConnectionClosed),
            },
            _ = time::sleep(self.timeout) => {
                self.pending.remove(&id);
                Err(RpcError::CallTimeout { id, timeout: self.timeout })
            },
        }
    }

    /// Stop the connection loops. Callers already blocked in
    /// [`call`](RpcClient::call) are not woken; they run into their
    /// timeout.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    fn next_id(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Dequeue requests in FIFO order and write them out. A send failure is
/// logged and the loop moves on; the waiting call times out since no
/// response can arrive for it.
async fn send_loop(
    mut conn: OwnedWriteHalf,
    mut requests: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            next = requests.recv() => match next {
                Some(request) => request,
                None => break,
            },
        };

        if let Err(err) = wire::send_request(&mut conn, &request).await {
            error!(id = request.id, %err, "failed to send request");
            continue;
        }
    }
    debug!("send loop finished");
}

/// Read responses one frame at a time and deliver each to the pending
/// call holding the matching id. The delivery channel send happens after
/// the table entry is removed, outside any table guard.
async fn receive_loop(mut conn: OwnedReadHalf, client: Arc<RpcClient>) {
    loop {
        let next = tokio::select! {
            _ = client.cancel.cancelled() => break,
            next = wire::read_response(&mut conn) => next,
        };

        match next {
            Ok(response) => match client.pending.remove(&response.id) {
                Some((id, delivery)) => {
                    if delivery.send(response).is_err() {
                        // Caller timed out between removal and delivery.
                        debug!(id, "pending call gone before delivery");
                    }
                },
                None => {
                    warn!(id = response.id, "dropping response with no pending call");
                },
            },
            Err(RpcError::ConnectionClosed) => {
                info!("connection closed by replica");
                break;
            },
            Err(err) => {
                error!(%err, "failed to read response");
                continue;
            },
        }
    }
    debug!("receive loop finished");
}
