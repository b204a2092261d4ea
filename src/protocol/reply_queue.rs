//! HTTP reply shapes for the `GET` surface (§4.5/§6).
//!
//! Grounded on `original_source/source/http/http.cpp`'s `ReplyManager`:
//! the source hand-rolls HTTP/1.1 response framing over a raw
//! `QTcpSocket` and queues replies so a second write never starts before
//! `onBytesWritten` confirms the first one drained. `hyper` already
//! serializes one connection's request/response cycle, so there's no
//! socket-level byte queue to reproduce here; what carries over is the
//! *reply's own* close-or-keep-alive decision (per `spec.md` §9 open
//! question), made independent of whatever state a peer's WebSocket side
//! is in, and the content-type dispatch for file-backed nodes that
//! `original_source/source/oscquery/qserver.cpp` does inline.

/// A response ready to hand to the HTTP layer: headers are derived from
/// `content_type`/`body.len()` at write time, not stored here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    /// Whether this reply should end the TCP connection. Decided purely
    /// from the reply's own status — never from a sibling WebSocket's
    /// close state.
    pub close: bool,
}

impl HttpReply {
    pub fn json(body: String) -> Self {
        HttpReply {
            status: 200,
            content_type: "application/json; charset=utf-8",
            body: body.into_bytes(),
            close: false,
        }
    }

    /// A file-backed node's contents (§4.2: "read from disk on each GET,
    /// served with a content type derived from the file extension").
    pub fn file(body: Vec<u8>, mime: &'static str) -> Self {
        HttpReply {
            status: 200,
            content_type: mime,
            body,
            close: false,
        }
    }

    pub fn not_found() -> Self {
        HttpReply {
            status: 404,
            content_type: "text/plain; charset=utf-8",
            body: b"not found".to_vec(),
            close: true,
        }
    }

    pub fn bad_request(message: &str) -> Self {
        HttpReply {
            status: 400,
            content_type: "text/plain; charset=utf-8",
            body: message.as_bytes().to_vec(),
            close: true,
        }
    }
}

/// Content type for a file-backed node's path, by extension. Anything
/// unrecognized falls back to `text/plain`, matching `qserver.cpp`'s own
/// dispatch (`.png` -> `image/png`, else left as plain text).
pub fn content_type_for_path(path: &str) -> &'static str {
    match std::path::Path::new(path)
        .extension()
        .and_then(std::ffi::OsStr::to_str)
    {
        Some("png") => "image/png",
        Some("json") => "application/json",
        _ => "text/plain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_decision_depends_only_on_the_reply_itself() {
        assert!(!HttpReply::json("{}".to_string()).close);
        assert!(HttpReply::not_found().close);
        assert!(HttpReply::bad_request("nope").close);
    }

    #[test]
    fn content_type_dispatches_by_extension() {
        assert_eq!(content_type_for_path("/shaders/a.png"), "image/png");
        assert_eq!(content_type_for_path("/presets/a.json"), "application/json");
        assert_eq!(content_type_for_path("/readme.txt"), "text/plain");
        assert_eq!(content_type_for_path("/no_extension"), "text/plain");
    }
}
