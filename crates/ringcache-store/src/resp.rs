//! RESP2 wire codec.
//!
//! # Wire Format
//!
//! ```text
//! Command:  *<n>\r\n  followed by n bulk strings  $<len>\r\n<bytes>\r\n
//! Replies:  +status\r\n   -error\r\n   :int\r\n
//!           $<len>\r\n<bytes>\r\n   ($-1\r\n is nil)
//!           *<n>\r\n<n replies>     (*-1\r\n is nil)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::command::{Command, Reply};
use crate::error::StoreError;

/// Largest bulk string accepted from a node (512 MB, the server-side limit).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest array accepted from a node.
pub const MAX_ARRAY_LEN: usize = 16 * 1024 * 1024;

/// Append the encoded command to `buf`.
///
/// A multi-word command name such as `CONFIG SET` is sent as separate
/// tokens.
pub fn encode_command(cmd: &Command, buf: &mut BytesMut) {
    let Some((name, args)) = cmd.parts().split_first() else {
        buf.put_slice(b"*0\r\n");
        return;
    };
    let name_tokens: Vec<&[u8]> = name
        .split(|b| *b == b' ')
        .filter(|t| !t.is_empty())
        .collect();

    buf.put_u8(b'*');
    buf.put_slice((name_tokens.len() + args.len()).to_string().as_bytes());
    buf.put_slice(b"\r\n");
    for part in name_tokens.into_iter().chain(args.iter().map(|a| &a[..])) {
        buf.put_u8(b'$');
        buf.put_slice(part.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.put_slice(part);
        buf.put_slice(b"\r\n");
    }
}

/// Encode a reply (used by the in-memory node and tests).
pub fn encode_reply(reply: &Reply, buf: &mut BytesMut) {
    match reply {
        Reply::Nil => buf.put_slice(b"$-1\r\n"),
        Reply::Status(s) => {
            buf.put_u8(b'+');
            buf.put_slice(s.as_bytes());
            buf.put_slice(b"\r\n");
        }
        Reply::Error(s) => {
            buf.put_u8(b'-');
            buf.put_slice(s.as_bytes());
            buf.put_slice(b"\r\n");
        }
        Reply::Int(n) => {
            buf.put_u8(b':');
            buf.put_slice(n.to_string().as_bytes());
            buf.put_slice(b"\r\n");
        }
        Reply::Bulk(b) => {
            buf.put_u8(b'$');
            buf.put_slice(b.len().to_string().as_bytes());
            buf.put_slice(b"\r\n");
            buf.put_slice(b);
            buf.put_slice(b"\r\n");
        }
        Reply::Array(items) => {
            buf.put_u8(b'*');
            buf.put_slice(items.len().to_string().as_bytes());
            buf.put_slice(b"\r\n");
            for item in items {
                encode_reply(item, buf);
            }
        }
    }
}

/// Try to parse one complete reply from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed; nothing is consumed in
/// that case. On success the reply's bytes are removed from `buf`.
pub fn parse_reply(buf: &mut BytesMut) -> Result<Option<Reply>, StoreError> {
    match parse_at(buf, 0)? {
        Some((reply, consumed)) => {
            buf.advance(consumed);
            Ok(Some(reply))
        }
        None => Ok(None),
    }
}

fn parse_at(buf: &[u8], pos: usize) -> Result<Option<(Reply, usize)>, StoreError> {
    if pos >= buf.len() {
        return Ok(None);
    }
    let Some(line_end) = find_crlf(buf, pos + 1) else {
        return Ok(None);
    };
    let line = &buf[pos + 1..line_end];
    let next = line_end + 2;

    match buf[pos] {
        b'+' => Ok(Some((
            Reply::Status(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b'-' => Ok(Some((
            Reply::Error(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b':' => Ok(Some((Reply::Int(parse_int(line)?), next))),
        b'$' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(Some((Reply::Nil, next)));
            }
            let len = len as usize;
            if len > MAX_BULK_LEN {
                return Err(StoreError::Protocol(format!(
                    "bulk string too large: {len} bytes (max {MAX_BULK_LEN})"
                )));
            }
            let end = next + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(StoreError::Protocol(
                    "bulk string not terminated by CRLF".into(),
                ));
            }
            Ok(Some((
                Reply::Bulk(Bytes::copy_from_slice(&buf[next..end])),
                end + 2,
            )))
        }
        b'*' => {
            let len = parse_int(line)?;
            if len < 0 {
                return Ok(Some((Reply::Nil, next)));
            }
            let len = len as usize;
            if len > MAX_ARRAY_LEN {
                return Err(StoreError::Protocol(format!(
                    "array too large: {len} elements (max {MAX_ARRAY_LEN})"
                )));
            }
            let mut items = Vec::with_capacity(len.min(1024));
            let mut cursor = next;
            for _ in 0..len {
                let Some((item, after)) = parse_at(buf, cursor)? else {
                    return Ok(None);
                };
                items.push(item);
                cursor = after;
            }
            Ok(Some((Reply::Array(items), cursor)))
        }
        other => Err(StoreError::Protocol(format!(
            "unknown reply type byte 0x{other:02x}"
        ))),
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}

fn parse_int(line: &[u8]) -> Result<i64, StoreError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            StoreError::Protocol(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}
