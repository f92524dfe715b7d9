/*
    fdc765
    NEC uPD765 floppy disk controller emulator

    Copyright 2025 The fdc765 Authors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    common::types::history_buffer.rs

    A fixed-capacity history buffer. Once full, pushing a new entry evicts
    the oldest one.
*/

use std::collections::{vec_deque, VecDeque};

#[derive(Clone, Debug)]
pub struct HistoryBuffer<T> {
    buffer:   VecDeque<T>,
    capacity: usize,
}

impl<T> Default for HistoryBuffer<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T> HistoryBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push an entry, evicting the oldest entry if the buffer is at capacity.
    /// A zero-capacity buffer records nothing.
    pub fn push(&mut self, entry: T) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(entry);
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate from the oldest to the newest entry.
    pub fn iter(&self) -> vec_deque::Iter<'_, T> {
        self.buffer.iter()
    }

    pub fn newest(&self) -> Option<&T> {
        self.buffer.back()
    }
}

impl<T: Clone> HistoryBuffer<T> {
    pub fn as_vec(&self) -> Vec<T> {
        self.buffer.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_buffer_evicts_oldest() {
        let mut hb = HistoryBuffer::new(3);
        for i in 0..5 {
            hb.push(i);
        }
        assert_eq!(hb.len(), 3);
        assert_eq!(hb.as_vec(), vec![2, 3, 4]);
        assert_eq!(hb.newest(), Some(&4));
    }

    #[test]
    fn history_buffer_zero_capacity_records_nothing() {
        let mut hb = HistoryBuffer::new(0);
        hb.push("entry");
        assert!(hb.is_empty());
    }

    #[test]
    fn history_buffer_clear() {
        let mut hb = HistoryBuffer::new(2);
        hb.push(1u8);
        hb.clear();
        assert!(hb.is_empty());
        hb.push(7);
        assert_eq!(hb.as_vec(), vec![7]);
    }
}
