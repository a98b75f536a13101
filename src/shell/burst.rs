//! Best-effort stream reads.
//!
//! A burst read waits (bounded by an optional deadline) until the stream has
//! data, then takes everything that is already available and returns without
//! waiting for more. It is not a "read exactly N bytes" or "read until idle"
//! primitive: callers that need a complete response keep issuing bursts
//! until their own framing condition holds (see [`read_until_prompt`]).

use std::convert::Infallible;
use std::time::Duration;

use futures::FutureExt;
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use super::protocol::Protocol;
use crate::error::ReadError;

/// Read buffer size for a single chunk of a burst.
const BURST_CHUNK: usize = 4096;

/// Convert an optional timeout into an absolute deadline starting now.
pub(crate) fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

/// Read one burst of raw bytes.
///
/// Fails with `TimedOut` if nothing arrives before `deadline` (`None` waits
/// forever) and with `Eof` if the stream is already closed. Dropping the
/// returned future cancels the read.
pub(crate) async fn read_burst_bytes<R>(
    reader: &mut R,
    deadline: Option<Instant>,
) -> Result<Vec<u8>, ReadError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; BURST_CHUNK];
    let first = match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, reader.read(&mut buf))
            .await
            .map_err(|_| ReadError::TimedOut)??,
        None => reader.read(&mut buf).await?,
    };
    if first == 0 {
        return Err(ReadError::Eof);
    }

    let mut out = buf[..first].to_vec();
    // Take what is already buffered; stop at the first read that would wait.
    while let Some(result) = reader.read(&mut buf).now_or_never() {
        match result? {
            0 => break,
            n => out.extend_from_slice(&buf[..n]),
        }
    }
    Ok(out)
}

/// Read one burst and decode it as (lossy) UTF-8 text.
pub(crate) async fn read_burst<R>(
    reader: &mut R,
    deadline: Option<Instant>,
) -> Result<String, ReadError>
where
    R: AsyncRead + Unpin,
{
    let bytes = read_burst_bytes(reader, deadline).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read and discard everything the stream produces.
///
/// Never completes: once the stream closes it parks forever, so it can only
/// end by being dropped. Used to keep the tool from blocking on a full
/// stderr pipe.
pub(crate) async fn drain<R>(reader: &mut R) -> Infallible
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_burst_bytes(reader, None).await {
            Ok(bytes) => trace!(
                target: "stopmotion::session",
                "Discarded {} bytes of stderr",
                bytes.len()
            ),
            Err(e) => {
                debug!(target: "stopmotion::session", "Stderr drain stopped: {}", e);
                return std::future::pending().await;
            }
        }
    }
}

/// Accumulate bursts from `stdout` until the output ends with a prompt.
///
/// Returns the accumulated text with the trailing prompt removed. While
/// waiting, `stderr` (when given) is drained concurrently; the drain is
/// dropped as soon as this function returns.
pub(crate) async fn read_until_prompt<O, E>(
    stdout: &mut O,
    stderr: Option<&mut E>,
    protocol: &Protocol,
    deadline: Option<Instant>,
) -> Result<String, ReadError>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let collect = collect_until_prompt(stdout, protocol, deadline);
    match stderr {
        Some(stderr) => tokio::select! {
            result = collect => result,
            never = drain(stderr) => match never {},
        },
        None => collect.await,
    }
}

async fn collect_until_prompt<O>(
    stdout: &mut O,
    protocol: &Protocol,
    deadline: Option<Instant>,
) -> Result<String, ReadError>
where
    O: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    loop {
        let burst = read_burst_bytes(stdout, deadline).await?;
        raw.extend_from_slice(&burst);

        let text = String::from_utf8_lossy(&raw);
        if let Some(response) = protocol.strip_prompt(&text) {
            return Ok(response.to_string());
        }
    }
}
