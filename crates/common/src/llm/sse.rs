//! Incremental Server-Sent Events parsing for upstream byte streams

use std::borrow::Cow;

/// Buffers raw bytes and yields complete SSE blocks
#[derive(Debug, Default)]
pub struct SseBuffer {
    pending: String,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk, normalizing line endings
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        let chunk_str = match std::str::from_utf8(chunk) {
            Ok(s) => Cow::Borrowed(s),
            Err(_) => Cow::Owned(String::from_utf8_lossy(chunk).into_owned()),
        };
        if chunk_str.contains('\r') {
            self.pending.push_str(&chunk_str.replace("\r\n", "\n"));
        } else {
            self.pending.push_str(&chunk_str);
        }
    }

    /// Next complete block, skipping blank ones
    pub fn next_block(&mut self) -> Option<String> {
        loop {
            let pos = self.pending.find("\n\n")?;
            let block = self.pending[..pos].to_string();
            self.pending.drain(..pos + 2);
            if !block.trim().is_empty() {
                return Some(block);
            }
        }
    }

    /// Whatever is left once the upstream closed
    pub fn take_remaining(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        (!rest.trim().is_empty()).then_some(rest)
    }
}

/// Joined `data:` payload of a block. Comments and other fields are ignored.
pub fn data_payload(block: &str) -> Option<String> {
    let lines: Vec<&str> = block
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_split_across_chunks() {
        let mut buf = SseBuffer::new();
        buf.push_chunk(b"data: {\"a\":1}\r\n\r\ndata: {\"b\"");
        assert_eq!(buf.next_block().as_deref(), Some("data: {\"a\":1}"));
        assert_eq!(buf.next_block(), None);

        buf.push_chunk(b":2}\n\n\n\n");
        assert_eq!(buf.next_block().as_deref(), Some("data: {\"b\":2}"));
        assert_eq!(buf.next_block(), None);
        assert_eq!(buf.take_remaining(), None);
    }

    #[test]
    fn test_data_payload() {
        assert_eq!(data_payload("data: [DONE]").as_deref(), Some("[DONE]"));
        assert_eq!(data_payload(": OPENROUTER PROCESSING"), None);
        assert_eq!(
            data_payload("event: x\ndata: one\ndata:two").as_deref(),
            Some("one\ntwo")
        );
    }
}
