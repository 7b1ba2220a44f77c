//! TXT query exchange
//!
//! The client's only view of DNS: issue a TXT query, get back at most one
//! TXT record or "no such name". The trait keeps the tunnel logic away
//! from sockets; the production implementation does one UDP round trip
//! per query against a recursive resolver.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use dpc_protocol::MAX_DATAGRAM;

use crate::error::{Error, Result};

/// How long to wait for a resolver response
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one TXT query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxtAnswer {
    /// NXDOMAIN, or a clean answer section with no TXT record
    Absent,
    /// Exactly one TXT record; segments concatenated
    Record(String),
}

/// The DNS seam the client pumps run against
#[async_trait]
pub trait TxtExchange: Send + Sync {
    /// Issue one TXT query for `name`.
    ///
    /// More than one TXT record in the answer is an error; everything the
    /// tunnel sends fits in one.
    async fn query_txt(&self, name: &str) -> Result<TxtAnswer>;
}

#[async_trait]
impl<X: TxtExchange + ?Sized> TxtExchange for Arc<X> {
    async fn query_txt(&self, name: &str) -> Result<TxtAnswer> {
        (**self).query_txt(name).await
    }
}

/// TXT queries over plain UDP to a single resolver address
pub struct UdpTxtExchange {
    resolver: SocketAddr,
    timeout: Duration,
}

impl UdpTxtExchange {
    /// Query the given resolver
    pub fn new(resolver: SocketAddr) -> Self {
        Self {
            resolver,
            timeout: QUERY_TIMEOUT,
        }
    }

    /// Query the first UDP nameserver from the system resolver
    /// configuration
    pub fn system() -> Result<Self> {
        let (config, _opts) = hickory_resolver::system_conf::read_system_conf()
            .map_err(|e| Error::Config(format!("reading system resolver config: {}", e)))?;
        let server = config
            .name_servers()
            .iter()
            .find(|ns| ns.protocol == hickory_resolver::config::Protocol::Udp)
            .or_else(|| config.name_servers().first())
            .ok_or_else(|| Error::Config("no nameservers in system config".into()))?;
        debug!("using system resolver {}", server.socket_addr);
        Ok(Self::new(server.socket_addr))
    }
}

#[async_trait]
impl TxtExchange for UdpTxtExchange {
    async fn query_txt(&self, name: &str) -> Result<TxtAnswer> {
        let qname = Name::from_ascii(name)
            .map_err(|e| Error::Dns(format!("invalid query name {:?}: {}", name, e)))?;

        let mut msg = Message::new();
        msg.set_id(rand::random());
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(qname, RecordType::TXT));
        let packed = msg.to_vec().map_err(|e| Error::Dns(e.to_string()))?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.send_to(&packed, self.resolver).await?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, _) = timeout(self.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| Error::Query {
                name: name.to_string(),
                reason: "query timed out".into(),
            })??;

        let response = Message::from_vec(&buf[..n]).map_err(|e| Error::Dns(e.to_string()))?;
        if response.id() != msg.id() {
            return Err(Error::Query {
                name: name.to_string(),
                reason: "response ID mismatch".into(),
            });
        }
        match response.response_code() {
            ResponseCode::NoError => {}
            ResponseCode::NXDomain => return Ok(TxtAnswer::Absent),
            other => {
                return Err(Error::Query {
                    name: name.to_string(),
                    reason: format!("resolver returned {}", other),
                })
            }
        }

        let mut records: Vec<String> = Vec::new();
        for answer in response.answers() {
            if let Some(RData::TXT(txt)) = answer.data() {
                records.push(
                    txt.txt_data()
                        .iter()
                        .map(|seg| String::from_utf8_lossy(seg).into_owned())
                        .collect(),
                );
            }
        }
        match records.len() {
            0 => Ok(TxtAnswer::Absent),
            1 => Ok(TxtAnswer::Record(records.swap_remove(0))),
            n => Err(Error::Query {
                name: name.to_string(),
                reason: format!("got {} TXT records", n),
            }),
        }
    }
}
