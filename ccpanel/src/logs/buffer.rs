use std::collections::{VecDeque, vec_deque};

/// Number of lines each log buffer keeps.
pub const MAX_KEEP: usize = 5000;

/// An append-only sequence of log lines holding at most `capacity` entries. When full, the oldest
/// lines go first.
#[derive(Clone, Debug)]
pub struct LogBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(MAX_KEEP)
    }
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "log buffer capacity must be positive");
        LogBuffer {
            lines: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn append(&mut self, line: String) {
        self.lines.push_back(line);
        self.evict();
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, lines: I) {
        self.lines.extend(lines);
        self.evict();
    }

    /// Replace the whole contents, keeping only the newest `capacity` lines.
    pub fn set_all(&mut self, lines: Vec<String>) {
        self.lines = VecDeque::from(lines);
        self.evict();
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// The newest `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .skip(self.lines.len().saturating_sub(n))
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn back(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    fn evict(&mut self) {
        let excess = self.lines.len().saturating_sub(self.capacity);
        if excess > 0 {
            self.lines.drain(..excess);
        }
    }
}

impl<'a> IntoIterator for &'a LogBuffer {
    type Item = &'a String;
    type IntoIter = vec_deque::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| i.to_string()).collect()
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut buffer = LogBuffer::default();
        for i in 0..(MAX_KEEP * 2 + 17) {
            buffer.append(i.to_string());
            assert!(buffer.len() <= MAX_KEEP);
        }
        assert_eq!(buffer.len(), MAX_KEEP);
        // The oldest went first.
        assert_eq!(buffer.iter().next(), Some("5017"));
        assert_eq!(buffer.back(), Some("10016"));
    }

    #[test]
    fn eviction_keeps_arrival_order() {
        let mut buffer = LogBuffer::new(3);
        buffer.extend(numbered(0..5));
        assert_eq!(buffer.to_vec(), numbered(2..5));
        buffer.append("5".to_string());
        assert_eq!(buffer.to_vec(), numbered(3..6));
    }

    #[test]
    fn set_all_keeps_newest() {
        let mut buffer = LogBuffer::new(4);
        buffer.append("old".to_string());
        buffer.set_all(numbered(0..10));
        assert_eq!(buffer.to_vec(), numbered(6..10));

        buffer.set_all(vec![]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn tail() {
        let mut buffer = LogBuffer::new(10);
        buffer.extend(numbered(0..6));
        assert_eq!(buffer.tail(2).collect::<Vec<_>>(), vec!["4", "5"]);
        assert_eq!(buffer.tail(100).count(), 6);
    }
}
