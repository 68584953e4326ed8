//! Newline-delimited record framing over a chunked HTTP body.
//!
//! Network chunks do not line up with records: a chunk may hold several
//! lines or end halfway through one. Bytes are buffered until a `\n` is seen.

use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use tracing::warn;

use crate::error::BackendError;

struct LineState<S> {
    body: Pin<Box<S>>,
    buf: BytesMut,
    // Bytes of `buf` already searched for a newline.
    scanned: usize,
    // Inside a line that outgrew `max_line_bytes`; skip to its newline.
    discarding: bool,
    max_line_bytes: usize,
    finished: bool,
}

/// Split a byte stream into lines.
///
/// Trailing `\r` is stripped, a final unterminated line is still yielded, and
/// the stream ends right after the first body error. Lines longer than
/// `max_line_bytes` are dropped, so at most one line's worth of bytes (plus
/// one chunk) is ever buffered.
pub fn ndjson_lines<S>(
    body: S,
    max_line_bytes: usize,
) -> impl Stream<Item = Result<String, BackendError>>
where
    S: Stream<Item = Result<Bytes, BackendError>>,
{
    let state = LineState {
        body: Box::pin(body),
        buf: BytesMut::new(),
        scanned: 0,
        discarding: false,
        max_line_bytes,
        finished: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(offset) = st.buf[st.scanned..].iter().position(|b| *b == b'\n') {
                let pos = st.scanned + offset;
                let line = st.buf.split_to(pos + 1);
                st.scanned = 0;

                if st.discarding || pos > st.max_line_bytes {
                    st.discarding = false;
                    warn!(limit = st.max_line_bytes, "Dropping oversized backend line");
                    continue;
                }
                return Some((Ok(decode_line(&line[..pos])), st));
            }
            st.scanned = st.buf.len();

            if st.buf.len() > st.max_line_bytes {
                st.discarding = true;
                st.buf.clear();
                st.scanned = 0;
            }

            if st.finished {
                if st.buf.is_empty() || st.discarding {
                    return None;
                }
                let rest = st.buf.split();
                st.scanned = 0;
                return Some((Ok(decode_line(&rest)), st));
            }

            match st.body.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    st.finished = true;
                    st.buf.clear();
                    st.scanned = 0;
                    return Some((Err(e), st));
                }
                None => st.finished = true,
            }
        }
    })
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
