/// Incremental `data:` line extractor for server-sent event bodies.
///
/// Bytes arrive in arbitrary chunks, possibly splitting a UTF-8 sequence;
/// complete lines are split out and any trailing partial line is kept for
/// the next [`feed`](Self::feed).
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the payloads of all complete `data:` lines.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }

        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines() {
        let mut buf = SseLineBuffer::new();
        let out = buf.feed(b"data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(out, vec!["{\"a\":1}", "[DONE]"]);
    }

    #[test]
    fn keeps_partial_line_until_newline() {
        let mut buf = SseLineBuffer::new();
        assert!(buf.feed(b"data: {\"te").is_empty());
        assert_eq!(buf.feed(b"xt\":\"hi\"}\r\n"), vec!["{\"text\":\"hi\"}"]);
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let mut buf = SseLineBuffer::new();
        let bytes = "data: é\n".as_bytes();
        assert!(buf.feed(&bytes[..7]).is_empty());
        assert_eq!(buf.feed(&bytes[7..]), vec!["é"]);
    }

    #[test]
    fn ignores_comments_and_event_lines() {
        let mut buf = SseLineBuffer::new();
        let out = buf.feed(b": OPENROUTER PROCESSING\nevent: message\ndata:x\n");
        assert_eq!(out, vec!["x"]);
    }
}
