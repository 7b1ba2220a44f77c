//! UDP dispatch loop for the server role
//!
//! One task reads datagrams serially and hands each one to a spawned
//! worker, so a worker stuck on upstream I/O never stalls the socket.
//! Workers classify the query by label count, consult the answer cache
//! for reverse polls, run the matching handler, and send back a single
//! authoritative TXT answer or a name error.

use std::net::SocketAddr;
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::rdata::TXT;
use hickory_proto::rr::{RData, Record, RecordType};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use dpc_protocol::{encode_reply, strip_parent, DatagramPool, Request, MAX_DATAGRAM};

use crate::cache::{ReplyCache, TimestampCache};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::handlers;
use crate::session::SessionTable;

/// Process-wide server state shared by every worker
pub(crate) struct ServerState {
    /// Parent domain, as configured
    pub(crate) parent: String,
    /// Live sessions
    pub(crate) sessions: SessionTable,
    /// Cached replies to reverse polls
    pub(crate) replies: ReplyCache,
    /// Replay suppression for new-session timestamps
    pub(crate) timestamps: TimestampCache,
}

impl ServerState {
    pub(crate) fn new(config: &ServerConfig) -> Self {
        Self {
            parent: config.domain.clone(),
            sessions: SessionTable::new(config.upstream.clone()),
            replies: ReplyCache::default(),
            timestamps: TimestampCache::default(),
        }
    }
}

/// The DNS-facing server: a UDP socket plus the shared state
pub struct DpcServer {
    socket: Arc<UdpSocket>,
    state: Arc<ServerState>,
    prune_interval: std::time::Duration,
}

impl DpcServer {
    /// Bind the listen socket and set up the session table and caches
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(config.listen).await?;
        info!("listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
            state: Arc::new(ServerState::new(&config)),
            prune_interval: config.prune_interval,
        })
    }

    /// The bound listen address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve forever. Returns only on a socket-level read failure.
    pub async fn run(self) -> Result<()> {
        let pruner_state = self.state.clone();
        let interval = self.prune_interval;
        tokio::spawn(async move { pruner_state.sessions.run_pruner(interval).await });

        let pool = DatagramPool::new();
        loop {
            let mut buf = pool.get();
            buf.resize(MAX_DATAGRAM, 0);
            let (n, src) = self.socket.recv_from(&mut buf).await?;
            buf.truncate(n);

            let socket = self.socket.clone();
            let state = self.state.clone();
            tokio::spawn(async move {
                handle_datagram(&socket, &state, &buf, src).await;
            });
        }
    }
}

/// Handle one datagram off the wire
async fn handle_datagram(socket: &UdpSocket, state: &ServerState, datagram: &[u8], src: SocketAddr) {
    let msg = match Message::from_vec(datagram) {
        Ok(m) => m,
        Err(e) => {
            debug!(%src, "unpacking datagram: {}", e);
            return;
        }
    };

    if msg.queries().len() != 1 {
        debug!(%src, "expected one question, got {}", msg.queries().len());
        return;
    }
    let query = msg.queries()[0].clone();
    if query.query_type() != RecordType::TXT {
        debug!(%src, name = %query.name(), "ignoring {} question", query.query_type());
        return;
    }
    if msg.message_type() == MessageType::Response {
        debug!(%src, name = %query.name(), "ignoring response");
        return;
    }

    // Names outside our domain are somebody else's problem.
    let stripped = match strip_parent(&query.name().to_string(), &state.parent) {
        Some(s) => s,
        None => return,
    };

    let request = match Request::parse(&stripped) {
        Ok(r) => r,
        Err(e) => {
            debug!(%src, name = %stripped, "{}", e);
            return;
        }
    };

    // Reverse polls are the only cached queries: a retransmitted poll
    // must get the same bytes rather than a second upstream read.
    let is_poll = matches!(request, Request::Reverse { .. });
    if is_poll {
        if let Some(cached) = state.replies.get(&stripped) {
            send_response(socket, src, msg, &query, Some(cached)).await;
            return;
        }
    }

    let outcome = match &request {
        Request::NewSession { timestamp } => handlers::new_session(state, timestamp).await,
        Request::Reverse { counter, id } => handlers::reverse(state, counter, id).await,
        Request::Forward {
            counter,
            payload,
            id,
        } => handlers::forward(state, counter, payload, id).await,
    };

    let reply = match outcome {
        Ok(Some(bytes)) => Some(encode_reply(&bytes)),
        Ok(None) => None,
        Err(e) => {
            debug!(%src, name = %stripped, "handler: {}", e);
            None
        }
    };

    if is_poll {
        if let Some(ref txt) = reply {
            state.replies.put(&stripped, txt.clone());
        }
    }

    send_response(socket, src, msg, &query, reply).await;
}

/// Turn the request message into a response and send it back
async fn send_response(
    socket: &UdpSocket,
    src: SocketAddr,
    mut msg: Message,
    query: &Query,
    reply: Option<String>,
) {
    msg.set_message_type(MessageType::Response);
    msg.set_authoritative(true);

    match reply {
        Some(txt) => {
            msg.set_response_code(ResponseCode::NoError);
            let mut record =
                Record::from_rdata(query.name().clone(), 0, RData::TXT(TXT::new(vec![txt])));
            record.set_dns_class(query.query_class());
            msg.add_answer(record);
        }
        None => {
            msg.set_response_code(ResponseCode::NXDomain);
        }
    }

    let packed = match msg.to_vec() {
        Ok(b) => b,
        Err(e) => {
            warn!(%src, "packing response: {}", e);
            return;
        }
    };
    if let Err(e) = socket.send_to(&packed, src).await {
        debug!(%src, "sending response: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::OpCode;
    use hickory_proto::rr::Name;
    use std::str::FromStr;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tokio::net::TcpListener;

    async fn start_server() -> (TcpListener, SocketAddr) {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = ServerConfig::new("example.com", upstream.local_addr().unwrap().to_string());
        config.listen = "127.0.0.1:0".parse().unwrap();
        config.prune_interval = Duration::from_secs(60);

        let server = DpcServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        (upstream, addr)
    }

    fn txt_query(id: u16, name: &str) -> Message {
        let mut msg = Message::new();
        msg.set_id(id);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(Name::from_str(name).unwrap(), RecordType::TXT));
        msg
    }

    async fn exchange(server: SocketAddr, msg: &Message) -> Message {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(&msg.to_vec().unwrap(), server).await.unwrap();
        let mut buf = [0u8; MAX_DATAGRAM];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("server did not answer")
            .unwrap();
        Message::from_vec(&buf[..n]).unwrap()
    }

    fn txt_string(msg: &Message) -> String {
        let answer = &msg.answers()[0];
        match answer.data() {
            Some(RData::TXT(txt)) => txt
                .txt_data()
                .iter()
                .map(|seg| String::from_utf8_lossy(seg).into_owned())
                .collect(),
            other => panic!("expected TXT, got {:?}", other),
        }
    }

    fn now_ns() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as i64
    }

    #[tokio::test]
    async fn test_handshake_over_udp() {
        let (upstream, server) = start_server().await;

        let query = txt_query(7, &format!("{}.example.com.", now_ns()));
        let response = exchange(server, &query).await;
        let _ = upstream.accept().await.unwrap();

        assert_eq!(response.id(), 7);
        assert!(response.authoritative());
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert_eq!(response.answers().len(), 1);

        let id = dpc_protocol::decode_reply(&txt_string(&response)).unwrap();
        assert!(!id.is_empty());
    }

    #[tokio::test]
    async fn test_bad_queries_get_no_answer() {
        let (_upstream, server) = start_server().await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // Garbage bytes, a name outside the domain, too many labels, and
        // a message marked as a response: all dropped without a reply.
        socket.send_to(b"\x00\x01nonsense", server).await.unwrap();
        let outside = txt_query(1, "0.abc.example.org.");
        socket
            .send_to(&outside.to_vec().unwrap(), server)
            .await
            .unwrap();
        let deep = txt_query(2, "a.b.c.d.example.com.");
        socket.send_to(&deep.to_vec().unwrap(), server).await.unwrap();
        let mut already = txt_query(3, &format!("{}.example.com.", now_ns()));
        already.set_message_type(MessageType::Response);
        socket
            .send_to(&already.to_vec().unwrap(), server)
            .await
            .unwrap();

        let mut buf = [0u8; MAX_DATAGRAM];
        let got = tokio::time::timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await;
        assert!(got.is_err(), "expected silence, got an answer");
    }

    #[tokio::test]
    async fn test_unparseable_timestamp_is_nxdomain() {
        let (_upstream, server) = start_server().await;

        let query = txt_query(9, "definitely-not-nanoseconds.example.com.");
        let response = exchange(server, &query).await;
        assert_eq!(response.response_code(), ResponseCode::NXDomain);
        assert!(response.answers().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_is_nxdomain() {
        let (_upstream, server) = start_server().await;

        let response = exchange(server, &txt_query(4, "0.zzzz.example.com.")).await;
        assert_eq!(response.response_code(), ResponseCode::NXDomain);
    }

    #[tokio::test]
    async fn test_case_insensitive_domain_match() {
        let (upstream, server) = start_server().await;

        let query = txt_query(5, &format!("{}.Example.COM.", now_ns()));
        let response = exchange(server, &query).await;
        let _ = upstream.accept().await.unwrap();
        assert_eq!(response.response_code(), ResponseCode::NoError);
    }
}
