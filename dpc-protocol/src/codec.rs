//! Payload and counter encodings
//!
//! Forward payloads travel client-to-server inside a DNS label and use
//! base32 without padding so they survive case folding. Replies travel in
//! TXT record text and use base64 without padding. Counters and session
//! ids are unsigned 64-bit integers in base 36.

use base32::Alphabet;
use base64::prelude::*;

use crate::error::{Error, Result};

const BASE32: Alphabet = Alphabet::Rfc4648 { padding: false };

/// Encode a forward payload for use as a DNS label
pub fn encode_payload(data: &[u8]) -> String {
    base32::encode(BASE32, data)
}

/// Decode a forward payload label. Case-insensitive: the label is
/// uppercased before decoding.
pub fn decode_payload(label: &str) -> Result<Vec<u8>> {
    base32::decode(BASE32, &label.to_ascii_uppercase())
        .ok_or_else(|| Error::Payload(label.to_string()))
}

/// Encode a reply payload for use as TXT record text
pub fn encode_reply(data: &[u8]) -> String {
    BASE64_STANDARD_NO_PAD.encode(data)
}

/// Decode TXT record text back into reply bytes
pub fn decode_reply(txt: &str) -> Result<Vec<u8>> {
    BASE64_STANDARD_NO_PAD
        .decode(txt)
        .map_err(|_| Error::Reply(txt.to_string()))
}

/// Format a counter or session id in lowercase base 36
pub fn format_counter(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = [0u8; 13]; // u64::MAX is 13 base-36 digits
    let mut i = out.len();
    while n > 0 {
        i -= 1;
        out[i] = DIGITS[(n % 36) as usize];
        n /= 36;
    }
    String::from_utf8_lossy(&out[i..]).into_owned()
}

/// Parse a base-36 counter or session id
pub fn parse_counter(s: &str) -> Result<u64> {
    u64::from_str_radix(s, 36).map_err(|_| Error::Counter(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_round_trip() {
        for len in 0..=39 {
            let data: Vec<u8> = (0..len as u8).collect();
            let encoded = encode_payload(&data);
            assert!(encoded.len() <= 63, "len {} encodes to {}", len, encoded.len());
            assert_eq!(decode_payload(&encoded).unwrap(), data);
        }
    }

    #[test]
    fn test_payload_case_insensitive() {
        let encoded = encode_payload(b"hello");
        assert_eq!(encoded, "NBSWY3DP");
        assert_eq!(decode_payload("nbswy3dp").unwrap(), b"hello");
        assert_eq!(decode_payload("NbSwY3dP").unwrap(), b"hello");
    }

    #[test]
    fn test_payload_rejects_garbage() {
        assert!(decode_payload("not valid!").is_err());
        assert!(decode_payload("0189").is_err()); // 0, 1, 8, 9 outside RFC 4648
    }

    #[test]
    fn test_reply_round_trip() {
        for len in [0usize, 1, 2, 3, 188, 189] {
            let data = vec![0xA5u8; len];
            assert_eq!(decode_reply(&encode_reply(&data)).unwrap(), data);
        }
    }

    #[test]
    fn test_reply_no_padding() {
        assert_eq!(encode_reply(b"abc"), "YWJj");
        assert_eq!(encode_reply(b"world"), "d29ybGQ");
        assert!(!encode_reply(b"x").contains('='));
    }

    #[test]
    fn test_reply_rejects_garbage() {
        assert!(decode_reply("???").is_err());
    }

    #[test]
    fn test_counter_round_trip() {
        for n in [0u64, 1, 35, 36, 1295, 1296, 0xDEADBEEF, u64::MAX] {
            assert_eq!(parse_counter(&format_counter(n)).unwrap(), n);
        }
    }

    #[test]
    fn test_counter_formatting() {
        assert_eq!(format_counter(0), "0");
        assert_eq!(format_counter(35), "z");
        assert_eq!(format_counter(36), "10");
    }

    #[test]
    fn test_counter_rejects_garbage() {
        assert!(parse_counter("").is_err());
        assert!(parse_counter("-1").is_err());
        assert!(parse_counter("hello world").is_err());
    }
}
