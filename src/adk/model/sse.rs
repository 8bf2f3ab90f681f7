// SPDX-License-Identifier: MIT

//! Incremental server-sent events parser

/// Parses a raw SSE byte stream into `data:` payloads.
/// Events are separated by a blank line.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the data payloads of every completed event
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(&chunk.replace("\r\n", "\n"));
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            let data: Vec<&str> = block
                .lines()
                .filter_map(|line| {
                    line.strip_prefix("data: ")
                        .or_else(|| line.strip_prefix("data:"))
                })
                .collect();
            if !data.is_empty() {
                events.push(data.join("\n"));
            }
        }

        events
    }

    /// Flush a trailing event that was not terminated by a blank line
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let data: Vec<&str> = rest
            .lines()
            .filter_map(|line| {
                line.strip_prefix("data: ")
                    .or_else(|| line.strip_prefix("data:"))
            })
            .collect();
        if data.is_empty() {
            None
        } else {
            Some(data.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: {\"a\"").is_empty());
        let events = parser.feed(":1}\n\ndata: [DONE]\n\n");
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn test_ignores_comments_and_event_lines() {
        let mut parser = SseParser::new();
        let events = parser.feed(": keepalive\n\nevent: message\ndata:x\n\n");
        assert_eq!(events, vec!["x".to_string()]);
    }

    #[test]
    fn test_crlf_and_finish() {
        let mut parser = SseParser::new();
        assert_eq!(parser.feed("data: one\r\n\r\n"), vec!["one".to_string()]);
        assert!(parser.feed("data: tail").is_empty());
        assert_eq!(parser.finish(), Some("tail".to_string()));
        assert_eq!(parser.finish(), None);
    }
}
