// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::Result;
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::rpc::{
    error::RpcError,
    message::{Request, Response},
    wire,
};

/// Per-request callback supplied by the storage side.
///
/// Every accepted request produces exactly one response: a handler error
/// is logged and converted into a failure response echoing the request
/// id, so the remote caller fails fast instead of waiting out its
/// timeout.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> impl Future<Output = Result<Response>> + Send;
}

/// Pipelined server for one accepted connection.
///
/// Three activities run until the peer disconnects or [`stop`]
/// (RpcServer::stop) is called: a read loop feeding a bounded request
/// queue, a fixed pool of workers invoking the handler, and a write loop
/// draining a bounded response queue. Both queues have capacity equal to
/// the worker count; a full request queue blocks the read loop and with
/// it frame consumption from the socket, which is the only flow-control
/// mechanism.
///
/// Responses leave in the order workers finish, not the order requests
/// arrived; correlation is by id only.
#[derive(Debug)]
pub struct RpcServer {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RpcServer {
    /// Spawn the read loop, `workers` worker tasks and the write loop
    /// for one accepted connection.
    pub fn start<H>(stream: TcpStream, workers: usize, handler: Arc<H>) -> Self
    where H: RequestHandler {
        let (read_half, write_half) = stream.into_split();
        let (requests_tx, requests_rx) = mpsc::channel::<Request>(workers);
        let (responses_tx, responses_rx) = mpsc::channel::<Response>(workers);
        let cancel = CancellationToken::new();

        let mut tasks = Vec::with_capacity(workers + 2);
        tasks.push(tokio::spawn(read_loop(read_half, requests_tx, cancel.clone())));

        let requests_rx = Arc::new(Mutex::new(requests_rx));
        for _ in 0..workers {
            tasks.push(tokio::spawn(worker(
                Arc::clone(&requests_rx),
                responses_tx.clone(),
                Arc::clone(&handler),
            )));
        }
        // The write loop must see the queue close once every worker is
        // gone, so no sender stays behind here.
        drop(responses_tx);
        tasks.push(tokio::spawn(write_loop(write_half, responses_rx)));

        Self { cancel, tasks }
    }

    /// Close the queues and wait until every worker has drained and
    /// exited and the write loop has flushed the remaining responses.
    pub async fn stop(self) {
        self.cancel.cancel();
        self.join().await;
    }

    /// Wait for the connection to finish naturally: the read loop ends
    /// on peer close, workers drain the queue, the write loop flushes.
    pub async fn join(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Read one request frame at a time and push it onto the bounded queue.
/// A single bad frame is logged and skipped, the connection survives;
/// only a peer close (or `stop`) ends the loop.
async fn read_loop(
    mut conn: OwnedReadHalf,
    requests: mpsc::Sender<Request>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = wire::read_request(&mut conn) => next,
        };

        match next {
            Ok(request) => {
                let queued = tokio::select! {
                    _ = cancel.cancelled() => break,
                    queued = requests.send(request) => queued,
                };
                if queued.is_err() {
                    break;
                }
            },
            Err(RpcError::ConnectionClosed) => {
                info!("connection closed by peer");
                break;
            },
            Err(err) => {
                error!(%err, "failed to read request");
                continue;
            },
        }
    }
    debug!("read loop finished");
}

/// Pop requests, run the handler, queue the response. Handler failures
/// still produce a response (see [`RequestHandler`]).
async fn worker<H>(
    requests: Arc<Mutex<mpsc::Receiver<Request>>>,
    responses: mpsc::Sender<Response>,
    handler: Arc<H>,
) where
    H: RequestHandler,
{
    loop {
        // Hold the queue lock only while waiting for the next request;
        // handling happens outside so workers run concurrently.
        let next = {
            let mut requests = requests.lock().await;
            requests.recv().await
        };
        let Some(request) = next else { break };

        let (id, kind) = (request.id, request.kind);
        let response = match handler.handle(request).await {
            Ok(response) => response,
            Err(err) => {
                error!(id, %err, "request handler failed");
                Response::error(id, kind, err.to_string())
            },
        };

        if responses.send(response).await.is_err() {
            break;
        }
    }
    debug!("worker finished");
}

/// Drain the response queue in FIFO order onto the socket. A write
/// error skips that response and keeps the loop alive.
async fn write_loop(mut conn: OwnedWriteHalf, mut responses: mpsc::Receiver<Response>) {
    while let Some(response) = responses.recv().await {
        if let Err(err) = wire::send_response(&mut conn, &response).await {
            error!(id = response.id, %err, "failed to send response");
            continue;
        }
    }
    debug!("write loop finished");
}
