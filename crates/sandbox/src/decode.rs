//! Iterative percent-decoding with malformed-sequence detection.
//!
//! Attackers double- and triple-encode traversal sequences to slip past
//! single-pass decoders, so path inputs are decoded repeatedly until they
//! reach a fixed point (capped at three passes). A malformed `%XX` or an
//! encoded NUL anywhere fails the whole check.

use krill::{Error, ErrorKind, Result};

const MAX_DECODE_PASSES: usize = 3;

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode one pass of `%XX` sequences. Errors on truncated or non-hex
/// escapes and on `%00`.
fn decode_once(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(Error::with_detail(
                    ErrorKind::Forbidden,
                    "Malformed percent-encoding",
                    input.to_string(),
                ));
            }
            let (hi, lo) = match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                (Some(hi), Some(lo)) => (hi, lo),
                _ => {
                    return Err(Error::with_detail(
                        ErrorKind::Forbidden,
                        "Malformed percent-encoding",
                        input.to_string(),
                    ));
                }
            };
            let decoded = (hi << 4) | lo;
            if decoded == 0 {
                return Err(Error::with_detail(
                    ErrorKind::Forbidden,
                    "Encoded NUL byte in input",
                    input.to_string(),
                ));
            }
            out.push(decoded);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| {
        Error::with_detail(
            ErrorKind::Forbidden,
            "Percent-decoding produced invalid UTF-8",
            input.to_string(),
        )
    })
}

/// Repeatedly percent-decode `input` until it stops changing, up to three
/// passes. Idempotent once a fixed point is reached.
pub fn iterative_uri_decode(input: &str) -> Result<String> {
    let mut current = input.to_string();
    for _ in 0..MAX_DECODE_PASSES {
        if !current.contains('%') {
            break;
        }
        let decoded = decode_once(&current)?;
        if decoded == current {
            break;
        }
        current = decoded;
    }
    Ok(current)
}
