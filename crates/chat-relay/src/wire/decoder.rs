/// Splits an upstream byte stream into `\n`-terminated lines.
///
/// Chunk boundaries are arbitrary: a line may span several chunks and one
/// chunk may hold several lines. Incomplete data stays buffered until the next
/// `push_chunk` or `finish`. A decoder serves exactly one stream.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    finished: bool,
}

impl LineDecoder {
    /// Appends `chunk` and returns every line it completed, in order.
    ///
    /// Returned lines carry neither the `\n` terminator nor a trailing `\r`.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        debug_assert!(!self.finished, "push_chunk after finish");
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.buf[start..end]));
            start = end + 1;
        }
        self.buf.drain(..start);
        lines
    }

    /// Flushes a final unterminated line once the transport has closed.
    pub fn finish(&mut self) -> Option<String> {
        self.finished = true;
        if self.buf.is_empty() {
            return None;
        }
        let line = decode_line(&self.buf);
        self.buf.clear();
        if line.trim().is_empty() {
            None
        } else {
            Some(line)
        }
    }

    /// Number of bytes waiting for a line terminator.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
