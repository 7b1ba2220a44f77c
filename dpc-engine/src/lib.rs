//! DPC Engine
//!
//! Server and client engines for a byte-stream tunnel over DNS TXT
//! queries. The server answers TXT questions under a parent domain and
//! maps each tunnel session onto an upstream TCP connection; the client
//! proxies stdio into those questions.
//!
//! # Architecture
//!
//! ```text
//! stdin  ──▶ forward pump ──▶ TXT query ──▶ dispatcher ──▶ forward ──▶ upstream
//!                                              │          handler       TCP
//! stdout ◀── reverse pump ◀── TXT answer ◀─────┴───────── reverse ◀──
//!                                                         handler
//! ```
//!
//! The wire grammar and payload encodings live in `dpc-protocol`; this
//! crate owns the session table, the UDP dispatch loop, the three
//! request handlers, and the client's handshake and pumps.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
mod handlers;
pub mod resolver;
pub mod server;
pub mod session;

pub use client::{next_interval, Client, TunnelTotals};
pub use config::{ClientConfig, ServerConfig, DEFAULT_LISTEN, DEFAULT_POLL_MAX, DEFAULT_PRUNE_INTERVAL};
pub use error::{Error, Result};
pub use resolver::{TxtAnswer, TxtExchange, UdpTxtExchange};
pub use server::DpcServer;
pub use session::{Session, SessionTable};
