//! Bounded receive buffer.
//!
//! The background reader appends everything it receives. Once the capacity
//! is exceeded the oldest bytes are dropped, never the newest. Command
//! issuance places a mark at the current end so callers can look at what
//! arrived since the last command.

use std::collections::VecDeque;

/// Size-bounded byte buffer fed by the background reader.
#[derive(Debug, Clone)]
pub struct ReceiveBuffer {
    data: VecDeque<u8>,
    capacity: usize,
    mark: usize,
}

impl ReceiveBuffer {
    /// Create an empty buffer retaining at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
            mark: 0,
        }
    }

    /// Maximum number of bytes retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes currently held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append bytes, evicting the oldest data beyond the capacity.
    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.len() >= self.capacity {
            self.data.clear();
            self.data.extend(&bytes[bytes.len() - self.capacity..]);
            self.mark = 0;
            return;
        }

        let overflow = (self.data.len() + bytes.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.data.drain(..overflow);
            self.mark = self.mark.saturating_sub(overflow);
        }
        self.data.extend(bytes);
    }

    /// Drop everything and reset the mark.
    pub fn clear(&mut self) {
        self.data.clear();
        self.mark = 0;
    }

    /// Return all buffered bytes and clear the buffer.
    pub fn take(&mut self) -> Vec<u8> {
        self.mark = 0;
        self.data.drain(..).collect()
    }

    /// Start a new "since last command" view at the current end.
    pub fn mark(&mut self) {
        self.mark = self.data.len();
    }

    /// Bytes appended after the last [`mark`](Self::mark).
    pub fn since_mark(&self) -> Vec<u8> {
        self.data.range(self.mark..).copied().collect()
    }

    /// Text appended after the last mark, lossily decoded.
    pub fn text_since_mark(&self) -> String {
        String::from_utf8_lossy(&self.since_mark()).into_owned()
    }

    /// Whole buffer contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }

    /// Whole buffer as text, lossily decoded.
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.to_vec()).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_within_capacity() {
        let mut buf = ReceiveBuffer::new(16);
        buf.append(b"hello");
        buf.append(b" world");
        assert_eq!(buf.as_text(), "hello world");
    }

    #[test]
    fn test_eviction_keeps_newest_suffix() {
        let cap = 10;
        let mut buf = ReceiveBuffer::new(cap);
        let mut history = Vec::new();

        for i in 0u8..50 {
            let chunk: Vec<u8> = (0..=(i % 7)).map(|k| i.wrapping_mul(3).wrapping_add(k)).collect();
            buf.append(&chunk);
            history.extend_from_slice(&chunk);

            assert!(buf.len() <= cap, "len {} exceeds cap after append {i}", buf.len());
            let expected = &history[history.len().saturating_sub(cap)..];
            assert_eq!(buf.to_vec(), expected);
        }
    }

    #[test]
    fn test_single_append_larger_than_capacity() {
        let mut buf = ReceiveBuffer::new(4);
        buf.append(b"abcdefgh");
        assert_eq!(buf.to_vec(), b"efgh");
    }

    #[test]
    fn test_mark_tracks_new_data() {
        let mut buf = ReceiveBuffer::new(32);
        buf.append(b"old output");
        buf.mark();
        assert!(buf.since_mark().is_empty());
        buf.append(b"START\r");
        assert_eq!(buf.text_since_mark(), "START\r");
    }

    #[test]
    fn test_mark_shifts_with_eviction() {
        let mut buf = ReceiveBuffer::new(8);
        buf.append(b"abcdef");
        buf.mark();
        buf.append(b"123");
        // "a" was evicted, mark moves from 6 to 5.
        assert_eq!(buf.to_vec(), b"bcdef123");
        assert_eq!(buf.since_mark(), b"123");

        buf.append(b"4567890");
        assert_eq!(buf.since_mark(), b"1234567890"[2..].to_vec());
    }

    #[test]
    fn test_take_clears() {
        let mut buf = ReceiveBuffer::new(8);
        buf.append(b"data");
        assert_eq!(buf.take(), b"data");
        assert!(buf.is_empty());
    }
}
