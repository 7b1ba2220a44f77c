//! The three request-class handlers
//!
//! Each returns `Ok(Some(bytes))` for a reply (possibly empty),
//! `Ok(None)` for the silent no-reply cases (duplicate counters, replayed
//! timestamps), and `Err` for anything worth logging. The dispatcher
//! turns both `None` and `Err` into a name-error response.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dpc_protocol::{decode_payload, parse_counter};

use crate::error::{Error, Result};
use crate::server::ServerState;
use crate::session::{ReadOutcome, WriteOutcome};

/// Maximum distance between a new-session timestamp and the local clock
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(24 * 60 * 60);

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

/// Handle a new-session request: one label holding a decimal
/// Unix-nanosecond timestamp
pub(crate) async fn new_session(state: &ServerState, timestamp: &str) -> Result<Option<Vec<u8>>> {
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| Error::Timestamp(timestamp.to_string()))?;

    let skew = Duration::from_nanos(now_ns().abs_diff(ts));
    if skew > MAX_CLOCK_SKEW {
        return Err(Error::ClockSkew(skew, MAX_CLOCK_SKEW));
    }

    // Replayed handshakes are suppressed without a word. The insert
    // happens before the dial, so a failed dial retires the timestamp;
    // the client retries with a fresh one.
    if state.timestamps.seen(timestamp) {
        return Ok(None);
    }

    let id = state.sessions.create().await?;
    Ok(Some(id.into_bytes()))
}

/// Handle a forward request: counter, base32 payload, session id
pub(crate) async fn forward(
    state: &ServerState,
    counter: &str,
    payload: &str,
    id: &str,
) -> Result<Option<Vec<u8>>> {
    let counter = parse_counter(counter)?;
    let payload = decode_payload(payload)?;

    let session = state.sessions.lookup(id).await.ok_or(Error::UnknownId)?;
    match session.write_forward(counter, &payload).await {
        WriteOutcome::Stale => Ok(None),
        WriteOutcome::Written => Ok(Some(Vec::new())),
        WriteOutcome::Failed(e) => {
            state.sessions.delete(id).await;
            Err(Error::Upstream(format!("sending to network: {}", e)))
        }
    }
}

/// Handle a reverse poll: counter, session id
pub(crate) async fn reverse(state: &ServerState, counter: &str, id: &str) -> Result<Option<Vec<u8>>> {
    let counter = parse_counter(counter)?;

    let session = state.sessions.lookup(id).await.ok_or(Error::UnknownId)?;
    match session.read_reverse(counter).await {
        ReadOutcome::Stale => Ok(None),
        ReadOutcome::Data(data) => Ok(Some(data)),
        ReadOutcome::Empty => Ok(Some(Vec::new())),
        ReadOutcome::Closed => {
            state.sessions.delete(id).await;
            Err(Error::Upstream("reading from network: closed".into()))
        }
        ReadOutcome::Failed(e) => {
            state.sessions.delete(id).await;
            Err(Error::Upstream(format!("reading from network: {}", e)))
        }
    }
}
