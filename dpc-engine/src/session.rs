//! Session state and the session table
//!
//! A session ties one tunnel id to one upstream TCP connection. The two
//! transfer directions are independent: the write half of the upstream
//! lives with the forward counter under one lock, the read half with the
//! reverse counter under another, so a forward and a reverse request for
//! the same session can proceed in parallel while two requests in the
//! same direction serialize. Counter checks and the I/O they gate happen
//! under the same lock, which is what keeps per-direction ordering exact.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use dpc_protocol::{format_counter, REVERSE_CHUNK};

use crate::error::{Error, Result};

/// How long a reverse request waits for upstream bytes. Long enough to
/// catch most bursty output, short enough to keep the DNS round trip
/// bounded.
pub const READ_WINDOW: Duration = Duration::from_millis(10);

struct ForwardLane {
    next: u64,
    upstream: OwnedWriteHalf,
}

struct ReverseLane {
    next: u64,
    upstream: OwnedReadHalf,
}

/// Outcome of a forward write attempt
pub(crate) enum WriteOutcome {
    /// Counter did not match; nothing happened
    Stale,
    /// Payload written upstream
    Written,
    /// Upstream write failed; the session must be torn down
    Failed(io::Error),
}

/// Outcome of a reverse read attempt
pub(crate) enum ReadOutcome {
    /// Counter did not match; nothing happened
    Stale,
    /// Upstream had bytes ready
    Data(Vec<u8>),
    /// Nothing within the read window
    Empty,
    /// Upstream closed the connection
    Closed,
    /// Upstream read failed; the session must be torn down
    Failed(io::Error),
}

/// One logical tunnel: an id, an upstream socket, and the per-direction
/// sliding counters
pub struct Session {
    id: String,
    started: Instant,
    last: std::sync::Mutex<Instant>,
    forward: Mutex<ForwardLane>,
    reverse: Mutex<ReverseLane>,
}

impl Session {
    fn new(id: String, reader: OwnedReadHalf, writer: OwnedWriteHalf) -> Self {
        let now = Instant::now();
        Self {
            id,
            started: now,
            last: std::sync::Mutex::new(now),
            forward: Mutex::new(ForwardLane {
                next: 0,
                upstream: writer,
            }),
            reverse: Mutex::new(ReverseLane {
                next: 0,
                upstream: reader,
            }),
        }
    }

    /// The session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Instant of the most recent upstream I/O attempt
    pub fn last_activity(&self) -> Instant {
        *self.last.lock().unwrap()
    }

    fn touch(&self) {
        *self.last.lock().unwrap() = Instant::now();
    }

    /// Write a forward payload upstream if `counter` is the next expected
    /// one. A stale or early counter is a no-op.
    pub(crate) async fn write_forward(&self, counter: u64, payload: &[u8]) -> WriteOutcome {
        let mut lane = self.forward.lock().await;
        if counter != lane.next {
            return WriteOutcome::Stale;
        }
        lane.next += 1;

        self.touch();
        let res = lane.upstream.write_all(payload).await;
        self.touch();
        match res {
            Ok(()) => WriteOutcome::Written,
            Err(e) => WriteOutcome::Failed(e),
        }
    }

    /// Read up to [`REVERSE_CHUNK`] bytes from upstream if `counter` is
    /// the next expected one, waiting at most [`READ_WINDOW`].
    pub(crate) async fn read_reverse(&self, counter: u64) -> ReadOutcome {
        let mut lane = self.reverse.lock().await;
        if counter != lane.next {
            return ReadOutcome::Stale;
        }
        lane.next += 1;

        let mut buf = vec![0u8; REVERSE_CHUNK];
        self.touch();
        let res = timeout(READ_WINDOW, lane.upstream.read(&mut buf)).await;
        self.touch();
        match res {
            Err(_) => ReadOutcome::Empty, // window elapsed
            Ok(Ok(0)) => ReadOutcome::Closed,
            Ok(Ok(n)) => {
                buf.truncate(n);
                ReadOutcome::Data(buf)
            }
            Ok(Err(e)) => ReadOutcome::Failed(e),
        }
    }

    async fn close(&self) {
        match self.forward.lock().await.upstream.shutdown().await {
            Ok(()) => info!(id = %self.id, "closed upstream after {:?}", self.started.elapsed()),
            Err(e) => warn!(id = %self.id, "closing upstream: {}", e),
        }
    }
}

struct TableInner {
    sessions: HashMap<String, Arc<Session>>,
    next_id: u64,
}

/// The id-to-session mapping plus the monotonic id allocator
///
/// Lookups take the read lock; create, delete, and the pruner's sweep
/// take the write lock. Id allocation happens under the write lock so
/// ids stay unique under concurrent creates.
pub struct SessionTable {
    upstream: String,
    inner: RwLock<TableInner>,
}

impl SessionTable {
    /// Create a table whose sessions dial `upstream`. The id allocator
    /// is seeded from the wall clock so ids do not repeat across runs.
    pub fn new(upstream: impl Into<String>) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
        Self {
            upstream: upstream.into(),
            inner: RwLock::new(TableInner {
                sessions: HashMap::new(),
                next_id: seed,
            }),
        }
    }

    /// Dial the upstream and register a fresh session, returning its id
    pub async fn create(&self) -> Result<String> {
        let stream = TcpStream::connect(&self.upstream)
            .await
            .map_err(|e| Error::Upstream(format!("connecting to {}: {}", self.upstream, e)))?;
        let local = stream.local_addr().ok();
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();

        let mut inner = self.inner.write().await;
        let id = format_counter(inner.next_id);
        inner.next_id += 1;
        inner
            .sessions
            .insert(id.clone(), Arc::new(Session::new(id.clone(), reader, writer)));

        info!(id = %id, "new session: {:?}->{:?}", local, peer);
        Ok(id)
    }

    /// Look up a session by id
    pub async fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.read().await.sessions.get(id).cloned()
    }

    /// Remove a session and close its upstream in the background.
    /// Deleting an id that is already gone is a no-op.
    pub async fn delete(&self, id: &str) {
        let removed = self.inner.write().await.sessions.remove(id);
        if let Some(session) = removed {
            tokio::spawn(async move { session.close().await });
        }
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Sweep idle sessions forever, sleeping `interval` between sweeps.
    ///
    /// Each sweep removes every session whose last activity predates the
    /// start of the previous sweep, so a session survives iff it saw any
    /// forward or reverse attempt within the last two intervals.
    pub async fn run_pruner(&self, interval: Duration) {
        let mut last_sweep = Instant::now();
        loop {
            tokio::time::sleep(interval).await;
            let mark = last_sweep;
            last_sweep = Instant::now();
            self.sweep(mark).await;
        }
    }

    /// One sweep: remove sessions idle since `mark`
    pub(crate) async fn sweep(&self, mark: Instant) {
        let mut inner = self.inner.write().await;
        let stale: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, session)| session.last_activity() < mark)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(session) = inner.sessions.remove(&id) {
                debug!(id = %id, "session idle, pruning");
                tokio::spawn(async move { session.close().await });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpc_protocol::parse_counter;
    use tokio::net::TcpListener;

    async fn upstream_fixture() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn test_create_lookup_delete() {
        let (listener, addr) = upstream_fixture().await;
        let table = SessionTable::new(addr);

        let id = table.create().await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        assert!(table.lookup(&id).await.is_some());
        assert_eq!(table.len().await, 1);

        table.delete(&id).await;
        assert!(table.lookup(&id).await.is_none());
        assert_eq!(table.len().await, 0);

        // The upstream side observes the close.
        let mut buf = [0u8; 1];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        // Deleting again is a no-op.
        table.delete(&id).await;
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_monotonic() {
        let (listener, addr) = upstream_fixture().await;
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });
        let table = SessionTable::new(addr);

        let a = table.create().await.unwrap();
        let b = table.create().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(parse_counter(&a).unwrap() + 1, parse_counter(&b).unwrap());
    }

    #[tokio::test]
    async fn test_create_fails_without_upstream() {
        let (listener, addr) = upstream_fixture().await;
        drop(listener);
        let table = SessionTable::new(addr);
        assert!(table.create().await.is_err());
        assert_eq!(table.len().await, 0);
    }

    #[tokio::test]
    async fn test_forward_counter_ordering() {
        let (listener, addr) = upstream_fixture().await;
        let table = SessionTable::new(addr);
        let id = table.create().await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        let session = table.lookup(&id).await.unwrap();

        assert!(matches!(
            session.write_forward(5, b"x").await,
            WriteOutcome::Stale
        ));
        assert!(matches!(
            session.write_forward(0, b"a").await,
            WriteOutcome::Written
        ));
        // Duplicate of an accepted counter is discarded.
        assert!(matches!(
            session.write_forward(0, b"a").await,
            WriteOutcome::Stale
        ));
        assert!(matches!(
            session.write_forward(1, b"b").await,
            WriteOutcome::Written
        ));

        let mut buf = [0u8; 2];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ab");
    }

    #[tokio::test]
    async fn test_reverse_counter_ordering_and_window() {
        let (listener, addr) = upstream_fixture().await;
        let table = SessionTable::new(addr);
        let id = table.create().await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        let session = table.lookup(&id).await.unwrap();

        assert!(matches!(session.read_reverse(3).await, ReadOutcome::Stale));

        peer.write_all(b"world").await.unwrap();
        match session.read_reverse(0).await {
            ReadOutcome::Data(data) => assert_eq!(data, b"world"),
            _ => panic!("expected data"),
        }

        // Nothing pending: the read window elapses.
        assert!(matches!(session.read_reverse(1).await, ReadOutcome::Empty));

        // Upstream close surfaces as Closed.
        drop(peer);
        assert!(matches!(session.read_reverse(2).await, ReadOutcome::Closed));
    }

    #[tokio::test]
    async fn test_sweep_removes_idle_sessions() {
        let (listener, addr) = upstream_fixture().await;
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });
        let table = SessionTable::new(addr);

        let idle = table.create().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mark = Instant::now();
        let fresh = table.create().await.unwrap();

        table.sweep(mark).await;
        assert!(table.lookup(&idle).await.is_none());
        assert!(table.lookup(&fresh).await.is_some());
    }

    #[tokio::test]
    async fn test_activity_defers_pruning() {
        let (listener, addr) = upstream_fixture().await;
        let table = SessionTable::new(addr);
        let id = table.create().await.unwrap();
        let (_peer, _) = listener.accept().await.unwrap();
        let session = table.lookup(&id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        // A reverse attempt counts as activity even when it reads nothing.
        let _ = session.read_reverse(0).await;

        table.sweep(Instant::now() - Duration::from_millis(5)).await;
        assert!(table.lookup(&id).await.is_some());
    }
}
