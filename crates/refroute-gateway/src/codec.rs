use serde_json::Value;

/// Splits a byte stream into complete newline-delimited JSON messages.
///
/// Bytes after the last newline stay buffered until the next chunk arrives.
/// A complete line that fails to parse is discarded; one corrupt line must
/// not tear down a channel that carries many logical streams.
#[derive(Debug, Default)]
pub struct LineCodec {
    buf: Vec<u8>,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buf.extend_from_slice(chunk);
        let mut messages = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let Ok(text) = std::str::from_utf8(&line) else {
                continue;
            };
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Ok(message) = serde_json::from_str::<Value>(trimmed) {
                messages.push(message);
            }
        }
        messages
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Renders one outgoing message as a single JSON document plus one trailing
/// newline, ready for an atomic pipe write.
pub fn encode_frame(message: &Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}
