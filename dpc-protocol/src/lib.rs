//! DPC Protocol Implementation
//!
//! The wire codec for a byte-stream tunnel carried over DNS TXT queries.
//! A client smuggles payload bytes into query names under a controlled
//! parent domain; the server answers with a single TXT record carrying the
//! reply payload.

mod buffer_pool;
mod codec;
mod error;
mod query;

pub use buffer_pool::{DatagramPool, PooledBuffer};
pub use codec::{
    decode_payload, decode_reply, encode_payload, encode_reply, format_counter, parse_counter,
};
pub use error::{Error, Result};
pub use query::{data_label, poll_label, session_label, strip_parent, Request};

/// Maximum length of a single DNS label in octets
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum raw bytes carried by one forward (client-to-upstream) query.
/// The largest N with ceil(N*8/5) <= 63, so the base32 payload fits one label.
pub const FORWARD_CHUNK: usize = 39;

/// Maximum raw bytes carried by one reverse (upstream-to-client) reply.
/// The base64 encoding plus DNS headers stays well inside one UDP datagram.
pub const REVERSE_CHUNK: usize = 189;

/// Size of the server's UDP receive buffers
pub const MAX_DATAGRAM: usize = 2048;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_chunk_fits_one_label() {
        // 39 raw bytes is the largest chunk whose base32 form fits a label.
        assert!(encode_payload(&[0xFF; FORWARD_CHUNK]).len() <= MAX_LABEL_LEN);
        assert!(encode_payload(&[0xFF; FORWARD_CHUNK + 1]).len() > MAX_LABEL_LEN);
    }

    #[test]
    fn test_reverse_chunk_fits_one_txt_string() {
        // A TXT character-string is capped at 255 octets.
        assert!(encode_reply(&[0xFF; REVERSE_CHUNK]).len() <= 255);
    }
}
