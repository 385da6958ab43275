use crate::error::DapError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

#[derive(Debug, Serialize, Deserialize)]
pub struct DapMessage {
    pub seq: u64,
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(flatten)]
    pub content: DapMessageContent,
}

/// Untagged, so variant order matters: a response also carries `command`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DapMessageContent {
    Response {
        request_seq: u64,
        success: bool,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    Event {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    Request {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<Value>,
    },
}

/// Read one `Content-Length` framed message. `Ok(None)` at end of input.
pub fn read_message(reader: &mut impl BufRead) -> Result<Option<DapMessage>, DapError> {
    let mut content_length = None;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) if name.eq_ignore_ascii_case("Content-Length") => {
                let length = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| DapError::Header(line.to_string()))?;
                content_length = Some(length);
            }
            Some(_) => {}
            None => return Err(DapError::Header(line.to_string())),
        }
    }

    let mut buffer = vec![0u8; content_length.unwrap_or(0)];
    reader.read_exact(&mut buffer)?;
    Ok(Some(serde_json::from_slice(&buffer)?))
}

/// Frame `msg` with its `Content-Length` header.
pub fn encode(msg: &DapMessage) -> Result<Vec<u8>, DapError> {
    let json = serde_json::to_vec(msg)?;
    let mut out = format!("Content-Length: {}\r\n\r\n", json.len()).into_bytes();
    out.extend_from_slice(&json);
    Ok(out)
}

/// Shared, sequenced output stream. Clones write to the same stream, so the
/// request loop and the execution thread can both emit messages.
pub struct DapWriter<W> {
    out: Arc<Mutex<W>>,
    seq: Arc<AtomicU64>,
}

impl<W> Clone for DapWriter<W> {
    fn clone(&self) -> Self {
        Self {
            out: Arc::clone(&self.out),
            seq: Arc::clone(&self.seq),
        }
    }
}

impl<W: Write> DapWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn send_response(
        &self,
        request_seq: u64,
        command: &str,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    ) -> Result<(), DapError> {
        self.send(DapMessageContent::Response {
            request_seq,
            success,
            command: command.to_string(),
            message,
            body,
        })
    }

    pub fn send_event(&self, event: &str, body: Option<Value>) -> Result<(), DapError> {
        self.send(DapMessageContent::Event {
            event: event.to_string(),
            body,
        })
    }

    fn send(&self, content: DapMessageContent) -> Result<(), DapError> {
        let msg_type = match content {
            DapMessageContent::Request { .. } => "request",
            DapMessageContent::Response { .. } => "response",
            DapMessageContent::Event { .. } => "event",
        };
        let mut out = self
            .out
            .lock()
            .map_err(|_| DapError::Header("output stream poisoned".to_string()))?;
        // Sequence under the lock so numbers hit the wire in order.
        let msg = DapMessage {
            seq: self.next_seq(),
            msg_type: msg_type.to_string(),
            content,
        };
        let bytes = encode(&msg)?;
        out.write_all(&bytes)?;
        out.flush()?;
        trace!(seq = msg.seq, len = bytes.len(), "sent {}", msg_type);
        Ok(())
    }
}

impl<W> DapWriter<W> {
    /// Run `f` against the underlying stream.
    pub fn with_stream<T>(&self, f: impl FnOnce(&W) -> T) -> Option<T> {
        self.out.lock().ok().map(|out| f(&*out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_reads_framed_request() {
        let body = r#"{"seq":1,"type":"request","command":"initialize","arguments":{"adapterID":"t"}}"#;
        let framed = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
        let mut reader = Cursor::new(framed.into_bytes());

        let msg = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(msg.seq, 1);
        match msg.content {
            DapMessageContent::Request { command, arguments } => {
                assert_eq!(command, "initialize");
                assert_eq!(arguments, Some(json!({"adapterID": "t"})));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(read_message(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_bad_header_is_an_error() {
        let mut reader = Cursor::new(b"Content-Length: abc\r\n\r\n".to_vec());
        assert!(matches!(read_message(&mut reader), Err(DapError::Header(_))));
    }

    #[test]
    fn test_writer_frames_and_sequences() {
        let writer = DapWriter::new(Vec::new());
        writer.send_event("initialized", None).unwrap();
        writer
            .send_response(4, "threads", true, None, Some(json!({"threads": []})))
            .unwrap();

        let bytes = writer.with_stream(|out| out.clone()).unwrap();
        let mut reader = Cursor::new(bytes);
        let first = read_message(&mut reader).unwrap().unwrap();
        let second = read_message(&mut reader).unwrap().unwrap();
        assert_eq!((first.seq, first.msg_type.as_str()), (1, "event"));
        assert_eq!((second.seq, second.msg_type.as_str()), (2, "response"));
        assert!(matches!(
            second.content,
            DapMessageContent::Response { request_seq: 4, success: true, .. }
        ));
    }
}
