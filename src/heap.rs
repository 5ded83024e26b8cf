//! Sequential d-ary min-heap over `(key, value)` pairs.
//!
//! This is the internal priority queue guarded by each local queue's
//! try-lock. The degree is a compile-time parameter; 8 keeps the tree
//! shallow so a sift touches few cache lines. Ties on equal keys are broken
//! arbitrarily.

pub type Element = (u64, u64);

#[derive(Debug)]
pub struct DaryHeap<const D: usize> {
    data: Vec<Element>,
}

impl<const D: usize> Default for DaryHeap<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const D: usize> DaryHeap<D> {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn peek(&self) -> Option<Element> {
        self.data.first().copied()
    }

    pub fn push(&mut self, element: Element) {
        self.data.push(element);
        self.sift_up(self.data.len() - 1);
    }

    pub fn pop_min(&mut self) -> Option<Element> {
        if self.data.is_empty() {
            return None;
        }
        let min = self.data.swap_remove(0);
        if !self.data.is_empty() {
            self.sift_down(0);
        }
        Some(min)
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / D;
            if self.data[parent].0 <= self.data[pos].0 {
                break;
            }
            self.data.swap(parent, pos);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.data.len();
        loop {
            let first_child = pos * D + 1;
            if first_child >= len {
                break;
            }
            let last_child = (first_child + D).min(len);
            let mut min_child = first_child;
            for child in first_child + 1..last_child {
                if self.data[child].0 < self.data[min_child].0 {
                    min_child = child;
                }
            }
            if self.data[pos].0 <= self.data[min_child].0 {
                break;
            }
            self.data.swap(pos, min_child);
            pos = min_child;
        }
    }
}
