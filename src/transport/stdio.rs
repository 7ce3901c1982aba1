//! Newline-delimited JSON-RPC over stdin/stdout
//!
//! Messages are decoded and registered on the read loop, then executed on their own tasks.
//! Responses and session notifications funnel into a single writer task so lines never interleave.

use std::{io, time::Duration};

use futures::future::join_all;
use serde_json::Value;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{broadcast, mpsc},
    task::JoinSet,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::CallerContext;
use crate::mcp::rpc::{json_rpc_error, INVALID_REQUEST, PARSE_ERROR};
use crate::mcp::server::{begin_json_rpc, Dispatch};
use crate::mcp::session::Session;
use crate::AppState;

/// Extra time granted to cancelled requests before they are aborted.
const STRAGGLER_WAIT: Duration = Duration::from_secs(1);

pub async fn serve_stdio(
    state: AppState,
    shutdown: CancellationToken,
    grace: Duration,
) -> io::Result<()> {
    serve_lines(
        state,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown,
        grace,
    )
    .await
}

pub async fn serve_lines<R, W>(
    state: AppState,
    reader: R,
    writer: W,
    shutdown: CancellationToken,
    grace: Duration,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let session = state.sessions.create();
    let caller = CallerContext::default();
    let (outbound, responses) = mpsc::unbounded_channel::<Value>();
    let writer_task = tokio::spawn(write_loop(writer, responses, session.subscribe()));
    let mut in_flight = JoinSet::new();
    let mut lines = reader.lines();

    info!(session = %session.id(), "stdio transport ready");

    let read_result = loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed");
                break Ok(());
            }
            Err(err) => break Err(err),
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let payload: Value = match serde_json::from_str(line) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(error = %err, "unparseable stdio line");
                let _ = outbound.send(json_rpc_error(None, PARSE_ERROR, "Parse error"));
                continue;
            }
        };

        match payload {
            Value::Array(batch) if batch.is_empty() => {
                let _ = outbound.send(json_rpc_error(None, INVALID_REQUEST, "Invalid Request"));
            }
            Value::Array(batch) => {
                let dispatches: Vec<Dispatch> = batch
                    .into_iter()
                    .map(|item| begin_json_rpc(&state, &session, &caller, item))
                    .collect();
                let outbound = outbound.clone();
                in_flight.spawn(async move {
                    let finished = dispatches.into_iter().map(Dispatch::finish);
                    let responses: Vec<Value> =
                        join_all(finished).await.into_iter().flatten().collect();
                    if !responses.is_empty() {
                        let _ = outbound.send(Value::Array(responses));
                    }
                });
            }
            payload => match begin_json_rpc(&state, &session, &caller, payload) {
                Dispatch::Complete(Some(response)) => {
                    let _ = outbound.send(response);
                }
                Dispatch::Complete(None) => {}
                Dispatch::Pending(call) => {
                    let outbound = outbound.clone();
                    in_flight.spawn(async move {
                        if let Some(response) = call.run().await {
                            let _ = outbound.send(response);
                        }
                    });
                }
            },
        }

        while in_flight.try_join_next().is_some() {}
    };

    drain(&mut in_flight, &session, grace).await;
    drop(outbound);
    state.sessions.close(session.id());

    let write_result = match writer_task.await {
        Ok(result) => result,
        Err(err) => Err(io::Error::new(io::ErrorKind::Other, err)),
    };

    info!(session = %session.id(), "stdio transport stopped");
    read_result.and(write_result)
}

async fn join_remaining(in_flight: &mut JoinSet<()>) {
    while in_flight.join_next().await.is_some() {}
}

/// Waits out the grace period, then cancels stragglers and finally aborts them.
async fn drain(in_flight: &mut JoinSet<()>, session: &Session, grace: Duration) {
    if in_flight.is_empty() {
        return;
    }

    info!(pending = in_flight.len(), "waiting for in-flight requests");
    if timeout(grace, join_remaining(in_flight)).await.is_ok() {
        return;
    }

    let cancelled = session.tracker().cancel_all();
    warn!(cancelled, "grace period elapsed, cancelling in-flight requests");
    if timeout(STRAGGLER_WAIT, join_remaining(in_flight))
        .await
        .is_err()
    {
        in_flight.abort_all();
        join_remaining(in_flight).await;
    }
}

async fn write_message<W>(writer: &mut W, message: &Value) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = message.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

async fn write_loop<W>(
    mut writer: W,
    mut responses: mpsc::UnboundedReceiver<Value>,
    mut notifications: broadcast::Receiver<Value>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut notifications_open = true;

    loop {
        let message = tokio::select! {
            biased;
            notification = notifications.recv(), if notifications_open => match notification {
                Ok(notification) => notification,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "stdio notification backlog dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    notifications_open = false;
                    continue;
                }
            },
            response = responses.recv() => match response {
                Some(response) => response,
                None => break,
            },
        };

        write_message(&mut writer, &message).await?;
    }

    while let Ok(notification) = notifications.try_recv() {
        write_message(&mut writer, &notification).await?;
    }
    writer.flush().await
}
