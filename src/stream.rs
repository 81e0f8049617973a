use tracing::debug;

use crate::backend::ProtocolKind;

const DATA_PREFIX: &str = "data:";
/// SSE fields other than `data` frame the stream but never carry a record.
const SSE_FRAMING_FIELDS: &[&str] = &["event:", "id:", "retry:"];

/// One meaningful unit recovered from an upstream stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRecord {
    /// A fragment of model output.
    Text(String),
    /// The backend refused to continue; carries its reason.
    Blocked(String),
}

/// Reassembles newline-delimited records from arbitrarily split byte chunks.
///
/// One decoder belongs to exactly one upstream response. Lines are split on raw
/// bytes before UTF-8 decoding, so a multi-byte character cut across two chunks
/// is reassembled rather than mangled. Lines that do not parse are counted and
/// dropped. After a [`StreamRecord::Blocked`] the decoder yields nothing more.
#[derive(Debug)]
pub struct StreamDecoder {
    protocol: ProtocolKind,
    buffer: Vec<u8>,
    dropped_lines: u64,
    blocked: bool,
}

impl StreamDecoder {
    pub fn new(protocol: ProtocolKind) -> Self {
        Self {
            protocol,
            buffer: Vec::new(),
            dropped_lines: 0,
            blocked: false,
        }
    }

    /// Feeds one chunk and returns the records completed by it, in arrival order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamRecord> {
        if self.blocked {
            return Vec::new();
        }

        self.buffer.extend_from_slice(bytes);
        let Some(last_newline) = self.buffer.iter().rposition(|byte| *byte == b'\n') else {
            return Vec::new();
        };

        let residual = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, residual);

        let mut records = Vec::new();
        for line in complete.split(|byte| *byte == b'\n') {
            if self.accept_line(line, &mut records) {
                break;
            }
        }
        records
    }

    /// Flushes a trailing line that never received its newline.
    pub fn finish(&mut self) -> Vec<StreamRecord> {
        let residual = std::mem::take(&mut self.buffer);
        let mut records = Vec::new();
        if !self.blocked {
            self.accept_line(&residual, &mut records);
        }
        records
    }

    pub fn dropped_lines(&self) -> u64 {
        self.dropped_lines
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Returns true once the stream has been blocked.
    fn accept_line(&mut self, raw: &[u8], records: &mut Vec<StreamRecord>) -> bool {
        if let Some(record) = self.decode_line(raw) {
            if matches!(record, StreamRecord::Blocked(_)) {
                self.blocked = true;
                self.buffer.clear();
            }
            records.push(record);
        }
        self.blocked
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<StreamRecord> {
        let Ok(text) = std::str::from_utf8(raw) else {
            self.drop_line("invalid utf-8");
            return None;
        };

        let line = text.trim();
        if line.is_empty() || is_sse_framing(line) {
            return None;
        }

        let line = line
            .strip_prefix(DATA_PREFIX)
            .map(str::trim_start)
            .unwrap_or(line);
        if line.is_empty() || self.protocol.is_stream_sentinel(line) {
            return None;
        }

        match self.protocol.parse_stream_line(line) {
            Ok(record) => record,
            Err(error) => {
                self.drop_line(&error.to_string());
                None
            }
        }
    }

    fn drop_line(&mut self, reason: &str) {
        self.dropped_lines += 1;
        debug!(
            protocol = %self.protocol,
            dropped_lines = self.dropped_lines,
            reason,
            "dropped unparsable stream line"
        );
    }
}

fn is_sse_framing(line: &str) -> bool {
    line.starts_with(':') || SSE_FRAMING_FIELDS.iter().any(|field| line.starts_with(field))
}
