//! Newline-delimited JSON bridge for the host command channel.
//!
//! Reads one `CommandEnvelope` per line, routes it through a
//! [`HostCommandServer`](crate::host::channel::HostCommandServer), and writes
//! `ResponseEnvelope` and `EventEnvelope` messages back one per line.
//!
//! Commands are pipelined: the reader keeps reading while earlier commands
//! are in flight, and each response is written as soon as it is ready. Hosts
//! match responses to commands by `request_id`.
//!
//! When run over stdio, stdout carries only the protocol. Diagnostics go to
//! stderr.

use crate::error::{EngineError, Result};
use crate::host::channel::{HostCommandClient, UpdateCommandHandler, command_channel};
use crate::host::contract::{
    CommandEnvelope, ContractError, ContractErrorKind, ResponseEnvelope,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const REQUEST_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 128;

type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

/// Run the bridge over the process's stdin and stdout until stdin closes.
///
/// # Errors
///
/// Returns [`EngineError::Channel`] when stdin or stdout fail.
pub async fn run_stdio_bridge<H: UpdateCommandHandler>(handler: Arc<H>) -> Result<()> {
    run_bridge(tokio::io::stdin(), tokio::io::stdout(), handler).await
}

/// Run the bridge over an arbitrary line stream until `input` reaches EOF.
///
/// Three tasks run side by side: the command server, an event forwarder
/// writing every event envelope to `output`, and the reader on the current
/// task. Responses and events share one writer, so lines never interleave.
///
/// # Errors
///
/// Returns [`EngineError::Channel`] when reading `input` or writing
/// `output` fails.
pub async fn run_bridge<R, W, H>(input: R, output: W, handler: Arc<H>) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    H: UpdateCommandHandler,
{
    let (client, server) = command_channel(REQUEST_CAPACITY, EVENT_CAPACITY, handler);
    let writer: SharedWriter<W> = Arc::new(Mutex::new(BufWriter::new(output)));

    let server_handle = tokio::spawn(server.run());

    let event_writer = Arc::clone(&writer);
    let mut event_rx = client.subscribe_events();
    let event_handle = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => {
                        let mut w = event_writer.lock().await;
                        if let Err(e) = write_line(&mut w, &json).await {
                            warn!(error = %e, "cannot write event envelope; stopping event forwarder");
                            break;
                        }
                    }
                    Err(e) => error!(error = %e, "cannot serialize event envelope; skipping"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged = n, "event forwarder lagged; some events were dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let reader_result = run_reader(input, client, Arc::clone(&writer)).await;

    // The client was dropped by `run_reader`, so the server drains and exits.
    event_handle.abort();
    let _ = event_handle.await;
    let _ = server_handle.await;

    reader_result
}

async fn run_reader<R, W>(input: R, client: HostCommandClient, writer: SharedWriter<W>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(input);
    let mut line = String::new();
    let mut in_flight: JoinSet<Result<()>> = JoinSet::new();

    let read_result = loop {
        line.clear();
        let bytes_read = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => {
                break Err(EngineError::Channel(format!(
                    "failed to read command line: {e}"
                )));
            }
        };

        if bytes_read == 0 {
            info!("command input closed; shutting down bridge");
            break Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<CommandEnvelope>(trimmed) {
            Ok(envelope) => {
                let request_id = envelope.request_id.clone();
                let pending = client.submit(envelope).await;
                let writer = Arc::clone(&writer);
                in_flight.spawn(async move {
                    let response = match pending {
                        Ok(pending) => pending.response().await,
                        Err(e) => Err(e),
                    };
                    let response = response.unwrap_or_else(|e| {
                        error!(request_id = %request_id, error = %e, "host command dispatch failed");
                        ResponseEnvelope::error(request_id, e)
                    });
                    write_response(&writer, &response).await
                });
            }
            Err(e) => {
                warn!(error = %e, raw_line = %trimmed, "cannot parse command envelope");
                let response = ResponseEnvelope::error(
                    "parse-error",
                    ContractError::new(
                        ContractErrorKind::InvalidEnvelope,
                        format!("failed to parse command envelope: {e}"),
                    ),
                );
                if let Err(e) = write_response(&writer, &response).await {
                    break Err(e);
                }
            }
        }
    };

    // Answer everything already read before the client goes away.
    let mut result = read_result;
    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok(Err(e)) => {
                if result.is_ok() {
                    result = Err(e);
                }
            }
            Ok(Ok(())) => {}
            Err(e) => error!(error = %e, "response task failed"),
        }
    }
    result
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &SharedWriter<W>,
    response: &ResponseEnvelope,
) -> Result<()> {
    let json = serde_json::to_string(response)
        .map_err(|e| EngineError::Channel(format!("cannot serialize response: {e}")))?;
    let mut w = writer.lock().await;
    write_line(&mut w, &json).await
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut BufWriter<W>, json: &str) -> Result<()> {
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| EngineError::Channel(format!("failed to write line: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| EngineError::Channel(format!("failed to write newline: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| EngineError::Channel(format!("failed to flush output: {e}")))?;
    Ok(())
}
