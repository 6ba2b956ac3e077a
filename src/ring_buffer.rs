use std::collections::HashSet;

use crate::llm::TokenId;

/// Fixed-capacity history of the most recently evaluated tokens.
#[derive(Debug, Clone, Default)]
pub struct RingBuffer {
    tokens: Vec<TokenId>,
    capacity: usize,
    // Next slot to write once the buffer is full.
    pos: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let mut buffer = Self::default();
        buffer.init(capacity);
        buffer
    }

    pub fn init(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.tokens = Vec::with_capacity(capacity);
        self.clear();
    }

    pub fn add(&mut self, token: TokenId) {
        if self.capacity == 0 {
            return;
        }
        if self.tokens.len() < self.capacity {
            self.tokens.push(token);
        } else {
            self.tokens[self.pos] = token;
        }
        self.pos = (self.pos + 1) % self.capacity;
    }

    /// Distinct tokens among the `n` most recent entries.
    pub fn recent(&self, n: usize) -> HashSet<TokenId> {
        let size = self.tokens.len();
        let n = n.min(size);
        let mut result = HashSet::with_capacity(n);
        if n == 0 {
            return result;
        }
        let start = (self.pos + size - n) % size;
        for i in 0..n {
            result.insert(self.tokens[(start + i) % size]);
        }
        result
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
        self.pos = 0;
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
