//! A minimal Server-Sent Events decoder, scoped to exactly the framing the
//! A2A streaming methods use: `data:` lines accumulate until a blank line
//! dispatches them, `:`-prefixed lines are comments, and `event:`/`id:`
//! lines are otherwise ignored (the dispatched payload is a self-describing
//! JSON-RPC response).

/// Accumulates raw bytes across chunk boundaries and yields dispatched
/// event payloads (the joined `data:` lines, one leading space stripped).
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes, returning every event dispatched as a
    /// result of it (zero, one, or more).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut dispatched = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buf.drain(..=pos).collect();
            let mut line = String::from_utf8_lossy(&line_bytes[..line_bytes.len() - 1]).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            if let Some(event) = self.process_line(&line) {
                dispatched.push(event);
            }
        }
        dispatched
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data_lines.is_empty() {
                return None;
            }
            let data = self.data_lines.join("\n");
            self.data_lines.clear();
            return Some(data);
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            let value = rest.strip_prefix(' ').unwrap_or(rest);
            self.data_lines.push(value.to_owned());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_on_blank_line() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"a\":1}\n\n");
        assert_eq!(events, vec!["{\"a\":1}".to_owned()]);
    }

    #[test]
    fn concatenates_multiple_data_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: line one\ndata: line two\n\n");
        assert_eq!(events, vec!["line one\nline two".to_owned()]);
    }

    #[test]
    fn ignores_comments_and_event_id_fields() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": heartbeat\nevent: message\nid: 1\ndata: payload\n\n");
        assert_eq!(events, vec!["payload".to_owned()]);
    }

    #[test]
    fn splits_across_chunk_boundaries() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: par").is_empty());
        let events = decoder.feed(b"tial\n\n");
        assert_eq!(events, vec!["partial".to_owned()]);
    }

    #[test]
    fn empty_buffer_on_blank_line_dispatches_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"\n").is_empty());
    }
}
