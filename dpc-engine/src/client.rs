//! Client role: handshake plus the two stdio pumps
//!
//! The forward pump chops stdin into 39-byte chunks and ships each one
//! as a data query. The reverse pump polls for upstream bytes, writing
//! them to stdout, and backs off with jitter while the channel is quiet.
//! The pumps share nothing but the byte tallies and a done channel; the
//! first signal on the channel ends the tunnel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use dpc_protocol::{data_label, decode_reply, poll_label, session_label, FORWARD_CHUNK};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::resolver::{TxtAnswer, TxtExchange};

/// Floor for the adaptive poll interval
pub const POLL_MIN: Duration = Duration::from_millis(1);

/// Growth factor applied to the poll interval after an empty poll
const POLL_GROWTH: f64 = 1.5;

/// Next poll interval after an empty poll: grow by half, capped at `max`.
/// The actual sleep is a uniform random duration below the returned
/// value, so polling never looks periodic.
pub fn next_interval(cur: Duration, max: Duration) -> Duration {
    let next = cur.mul_f64(POLL_GROWTH);
    if next > max {
        max
    } else {
        next
    }
}

/// Bytes moved in each direction over the life of a tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelTotals {
    /// stdin-to-upstream bytes
    pub forward: u64,
    /// upstream-to-stdout bytes
    pub reverse: u64,
}

struct PumpShared<X> {
    exchange: X,
    /// Id-qualified domain suffix, `.ID.parent`
    domain: String,
    forward_bytes: AtomicU64,
    reverse_bytes: AtomicU64,
}

/// The client side of the tunnel
pub struct Client<X> {
    config: ClientConfig,
    exchange: X,
}

impl<X: TxtExchange + 'static> Client<X> {
    /// Create a client for the configured parent domain
    pub fn new(config: ClientConfig, exchange: X) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, exchange })
    }

    /// Proxy stdio through the tunnel until one side finishes.
    ///
    /// Returns the byte tallies along with the error that ended the
    /// tunnel; a closed stdin is reported like any other pump failure.
    pub async fn run(self) -> (TunnelTotals, Result<()>) {
        self.run_with_io(tokio::io::stdin(), tokio::io::stdout())
            .await
    }

    /// Proxy an arbitrary byte stream pair through the tunnel
    pub async fn run_with_io<R, W>(self, input: R, output: W) -> (TunnelTotals, Result<()>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let parent = format!(".{}", self.config.domain.trim_matches('.'));

        // The handshake must finish before either pump starts: every
        // later query carries the id it returns.
        let id = match handshake(&self.exchange, &parent).await {
            Ok(id) => id,
            Err(e) => return (TunnelTotals::default(), Err(e)),
        };
        debug!(id = %id, "tunnel established");

        let shared = Arc::new(PumpShared {
            exchange: self.exchange,
            domain: format!(".{}{}", id, parent),
            forward_bytes: AtomicU64::new(0),
            reverse_bytes: AtomicU64::new(0),
        });

        let (done_tx, mut done_rx) = mpsc::channel::<Error>(2);
        let forward = tokio::spawn(forward_pump(shared.clone(), input, done_tx.clone()));
        let reverse = tokio::spawn(reverse_pump(
            shared.clone(),
            output,
            self.config.poll_max,
            done_tx,
        ));

        // First signal wins; the other pump is abandoned.
        let outcome = match done_rx.recv().await {
            Some(e) => Err(e),
            None => Ok(()),
        };
        forward.abort();
        reverse.abort();

        let totals = TunnelTotals {
            forward: shared.forward_bytes.load(Ordering::Relaxed),
            reverse: shared.reverse_bytes.load(Ordering::Relaxed),
        };
        (totals, outcome)
    }
}

/// Issue one tunnel query and decode the reply. An absent record and an
/// empty record both come back as no bytes.
async fn query<X: TxtExchange>(exchange: &X, name: &str) -> Result<Vec<u8>> {
    match exchange.query_txt(name).await? {
        TxtAnswer::Absent => Ok(Vec::new()),
        TxtAnswer::Record(txt) if txt.is_empty() => Ok(Vec::new()),
        TxtAnswer::Record(txt) => Ok(decode_reply(&txt)?),
    }
}

/// Ask the server for a session id using the current time as the nonce
async fn handshake<X: TxtExchange>(exchange: &X, parent: &str) -> Result<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default();
    let name = format!("{}{}", session_label(now), parent);

    let id = query(exchange, &name)
        .await
        .map_err(|e| Error::Handshake(e.to_string()))?;
    if id.is_empty() {
        return Err(Error::Handshake("empty ID from server".into()));
    }
    String::from_utf8(id).map_err(|_| Error::Handshake("ID is not valid text".into()))
}

/// Pump stdin into data queries
async fn forward_pump<X: TxtExchange, R: AsyncRead + Unpin>(
    shared: Arc<PumpShared<X>>,
    mut input: R,
    done: mpsc::Sender<Error>,
) {
    let mut buf = [0u8; FORWARD_CHUNK];
    let mut counter = 0u64;
    loop {
        match input.read(&mut buf).await {
            Ok(0) => {
                // Closed stdin ends the tunnel like any other read
                // failure; the caller decides what it means.
                let _ = done
                    .send(Error::Io(std::io::ErrorKind::UnexpectedEof.into()))
                    .await;
                return;
            }
            Ok(n) => {
                let name = format!("{}{}", data_label(counter, &buf[..n]), shared.domain);
                if let Err(e) = query(&shared.exchange, &name).await {
                    let _ = done.send(e).await;
                    return;
                }
                shared.forward_bytes.fetch_add(n as u64, Ordering::Relaxed);
                counter += 1;
            }
            Err(e) => {
                let _ = done.send(e.into()).await;
                return;
            }
        }
    }
}

/// Poll for upstream bytes and pump them to stdout
async fn reverse_pump<X: TxtExchange, W: AsyncWrite + Unpin>(
    shared: Arc<PumpShared<X>>,
    mut output: W,
    poll_max: Duration,
    done: mpsc::Sender<Error>,
) {
    let mut counter = 0u64;
    let mut interval = POLL_MIN;
    loop {
        let name = format!("{}{}", poll_label(counter), shared.domain);
        let data = match query(&shared.exchange, &name).await {
            Ok(d) => d,
            Err(e) => {
                let _ = done.send(e).await;
                return;
            }
        };
        counter += 1;

        if !data.is_empty() {
            if let Err(e) = write_out(&mut output, &data).await {
                let _ = done.send(e.into()).await;
                return;
            }
            shared.reverse_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
            interval = POLL_MIN;
            continue;
        }

        // Quiet channel: back off, and only sleep a random slice of the
        // interval so the query cadence carries no period.
        interval = next_interval(interval, poll_max);
        let jitter = rand::thread_rng().gen_range(0..interval.as_nanos() as u64);
        tokio::time::sleep(Duration::from_nanos(jitter)).await;
    }
}

async fn write_out<W: AsyncWrite + Unpin>(output: &mut W, data: &[u8]) -> std::io::Result<()> {
    output.write_all(data).await?;
    output.flush().await
}
