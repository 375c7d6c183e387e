use crate::source::{Position, Positioned};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Returned when pushing back past the start of a scanner
pub struct EndOfStream;

impl std::fmt::Display for EndOfStream {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "end of stream")
    }
}

impl std::error::Error for EndOfStream {}

/// A pushdown iterator over a sequence of items.
///
/// Besides plain iteration it can peek, un-consume, and save/restore its
/// cursor on a stack. The save stack only holds indices.
#[derive(Debug, Clone)]
pub struct ScannerIterator<T> {
    data: Vec<T>,
    idx: usize,
    state_stack: Vec<usize>,
}

impl<T: Clone> ScannerIterator<T> {
    /// Scan over `data` from the beginning.
    pub fn new(data: Vec<T>) -> Self {
        ScannerIterator {
            data,
            idx: 0,
            state_stack: Vec::new(),
        }
    }

    /// Peek at the next item without consuming it.
    pub fn lookahead(&self) -> Option<&T> {
        self.data.get(self.idx)
    }

    /// Un-consume the last item.
    pub fn pushback(&mut self) -> Result<(), EndOfStream> {
        if self.idx == 0 {
            return Err(EndOfStream);
        }
        self.idx -= 1;
        Ok(())
    }

    /// Save the cursor.
    pub fn push_state(&mut self) {
        self.state_stack.push(self.idx);
    }

    /// Restore the most recently saved cursor.
    pub fn pop_state(&mut self) {
        if let Some(idx) = self.state_stack.pop() {
            self.idx = idx;
        }
    }

    /// Forget the most recently saved cursor, keeping the current one.
    pub fn clear_state(&mut self) {
        self.state_stack.pop();
    }

    /// True once every item has been consumed.
    pub fn is_empty(&self) -> bool {
        self.idx >= self.data.len()
    }

    /// True if nothing has been consumed yet.
    pub fn is_starting(&self) -> bool {
        self.idx == 0
    }

    /// Everything not yet consumed.
    pub fn remain(&self) -> &[T] {
        &self.data[self.idx.min(self.data.len())..]
    }

    /// Current cursor.
    pub fn index(&self) -> usize {
        self.idx
    }

    /// Consume everything that is left.
    pub fn drain(&mut self) {
        self.idx = self.data.len();
    }
}

impl<T: Clone + Positioned> ScannerIterator<T> {
    /// Position of the item under the cursor, or of the last item once the
    /// scanner is exhausted.
    pub fn get_pos(&self) -> Option<Position> {
        self.data
            .get(self.idx)
            .or_else(|| self.data.last())
            .map(Positioned::pos)
    }
}

impl<T: Clone> Iterator for ScannerIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let item = self.data.get(self.idx).cloned();
        if item.is_some() {
            self.idx += 1;
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner(s: &str) -> ScannerIterator<char> {
        ScannerIterator::new(s.chars().collect())
    }

    #[test]
    fn test_next_and_lookahead() {
        let mut it = scanner("ab");
        assert!(it.is_starting());
        assert_eq!(it.lookahead(), Some(&'a'));
        assert_eq!(it.next(), Some('a'));
        assert_eq!(it.next(), Some('b'));
        assert!(it.is_empty());
        assert_eq!(it.next(), None);
        assert_eq!(it.lookahead(), None);
    }

    #[test]
    fn test_pushback() {
        let mut it = scanner("xyz");
        assert_eq!(it.pushback(), Err(EndOfStream));
        it.next();
        it.next();
        it.pushback().unwrap();
        assert_eq!(it.next(), Some('y'));
        assert_eq!(it.remain(), &['z']);
    }

    #[test]
    fn test_save_restore() {
        let mut it = scanner("hello");
        it.push_state();
        it.next();
        it.push_state();
        it.next();
        it.next();
        it.pop_state();
        assert_eq!(it.index(), 1);
        it.pop_state();
        assert!(it.is_starting());
    }

    #[test]
    fn test_remain_after_restore() {
        let mut it = scanner("ifeq (a,b)");
        for _ in 0..5 {
            it.next();
        }
        it.push_state();
        it.next();
        it.next();
        assert_eq!(it.remain(), &[',', 'b', ')']);
        it.pop_state();
        assert_eq!(it.index(), 5);
        assert_eq!(it.remain().iter().collect::<String>(), "(a,b)");
        assert_eq!(it.next(), Some('('));
    }

    #[test]
    fn test_clear_state() {
        let mut it = scanner("abc");
        it.push_state();
        it.next();
        it.clear_state();
        // nothing saved any more
        it.pop_state();
        assert_eq!(it.index(), 1);
    }

    #[test]
    fn test_drain() {
        let mut it = scanner("abc");
        it.drain();
        assert!(it.is_empty());
        assert!(it.remain().is_empty());
    }
}
