//! Text decoding for the "decoded text" notification and for display.

/// Incremental, lossy UTF-8 decoder.
///
/// Bytes arrive from the transport in arbitrary pieces, so a multi-byte
/// sequence may be split across reads. Incomplete trailing sequences are held
/// back until the next call; invalid bytes become `U+FFFD` and decoding
/// carries on.
#[derive(Debug, Default, Clone)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Create a decoder with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes held back waiting for the rest of a sequence.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Decode `bytes`, prepending whatever was held back last time.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut output = String::with_capacity(self.pending.len());
        let mut consumed = 0;

        loop {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    output.push_str(valid);
                    consumed = self.pending.len();
                    break;
                },
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    // The prefix up to `valid_up_to` is valid UTF-8.
                    output.push_str(std::str::from_utf8(&rest[..valid_up_to]).unwrap_or_default());
                    match err.error_len() {
                        Some(bad) => {
                            output.push(char::REPLACEMENT_CHARACTER);
                            consumed += valid_up_to + bad;
                        },
                        None => {
                            consumed += valid_up_to;
                            break;
                        },
                    }
                },
            }
        }

        self.pending.drain(..consumed);
        output
    }
}

/// Make instrument output printable on a terminal.
///
/// Carriage returns become newlines, `\r\n` collapses to one newline, other
/// control characters are dropped. The ACK byte is rendered as `<ACK>`.
pub fn printable(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    let mut out = String::with_capacity(normalized.len());
    for ch in normalized.chars() {
        match ch {
            '\n' | '\t' => out.push(ch),
            '\r' => out.push('\n'),
            '\u{6}' => out.push_str("<ACK>"),
            _ if ch.is_control() => {},
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_replaces_invalid_bytes_and_continues() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(&[0xFF, b'A', 0xFE, b'B']), "\u{FFFD}A\u{FFFD}B");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_decoder_holds_split_sequence() {
        let mut decoder = Utf8Decoder::new();
        // "°" is C2 B0
        assert_eq!(decoder.decode(&[b'1', b'2', 0xC2]), "12");
        assert_eq!(decoder.pending_len(), 1);
        assert_eq!(decoder.decode(&[0xB0, b'C']), "\u{B0}C");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_printable_normalizes_line_endings() {
        assert_eq!(printable("START\r\nOK\rX\u{7}"), "START\nOK\nX");
        assert_eq!(printable("\u{6}"), "<ACK>");
    }
}
