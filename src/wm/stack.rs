//! Window Stack
//!
//! The circular ring of managed top-level windows. Entries live in a slot
//! arena and point forward to exactly one other entry; `current` is the
//! focused entry and `tail` is always the entry whose `next` is `current`.

use slotmap::{SlotMap, new_key_type};
use thiserror::Error;

use crate::wm::WindowHandle;

new_key_type! {
    /// Arena key of a stack entry
    struct EntryKey;
}

/// Stack errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StackError {
    /// The window is already part of the ring
    #[error("window {0} is already managed")]
    AlreadyManaged(WindowHandle),
}

#[derive(Debug)]
struct Entry {
    window: WindowHandle,
    next: EntryKey,
}

/// Circular window ring with a focus pointer
#[derive(Debug, Default)]
pub struct WindowStack {
    entries: SlotMap<EntryKey, Entry>,
    current: Option<EntryKey>,
    tail: Option<EntryKey>,
}

impl WindowStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of managed windows
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The focused window, if any
    pub fn current(&self) -> Option<WindowHandle> {
        self.current.map(|key| self.entries[key].window)
    }

    /// Splice `window` in front of the current entry and make it current.
    pub fn insert(&mut self, window: WindowHandle) -> Result<(), StackError> {
        if self.exists(window) {
            return Err(StackError::AlreadyManaged(window));
        }

        match (self.current, self.tail) {
            (Some(current), Some(tail)) => {
                let key = self.entries.insert(Entry { window, next: current });
                self.entries[tail].next = key;
                self.current = Some(key);
            }
            _ => {
                let key = self.entries.insert_with_key(|key| Entry { window, next: key });
                self.current = Some(key);
                self.tail = Some(key);
            }
        }

        Ok(())
    }

    /// Unlink `window` from the ring.
    ///
    /// Returns `false` when the window was not managed. Removing the current
    /// entry hands focus to its predecessor in traversal order.
    pub fn remove(&mut self, window: WindowHandle) -> bool {
        let Some((prev, key)) = self.find_with_predecessor(window) else {
            return false;
        };

        if prev == key {
            // Sole entry
            self.entries.remove(key);
            self.current = None;
            self.tail = None;
            return true;
        }

        let next = self.entries[key].next;
        self.entries[prev].next = next;
        self.entries.remove(key);

        if self.current == Some(key) {
            self.current = Some(prev);
            self.tail = Some(self.predecessor_of(prev));
        } else if self.tail == Some(key) {
            self.tail = Some(prev);
        }

        true
    }

    /// Whether `window` is part of the ring
    pub fn exists(&self, window: WindowHandle) -> bool {
        self.iter().any(|w| w == window)
    }

    /// Move focus one step forward along the ring.
    pub fn cycle(&mut self) {
        if let Some(current) = self.current {
            self.tail = Some(current);
            self.current = Some(self.entries[current].next);
        }
    }

    /// The window that follows `window` in the ring
    #[cfg(test)]
    pub fn next_of(&self, window: WindowHandle) -> Option<WindowHandle> {
        self.find_with_predecessor(window)
            .map(|(_, key)| self.entries[self.entries[key].next].window)
    }

    /// Walk the ring once, starting at the current window
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            stack: self,
            at: self.current,
            remaining: self.entries.len(),
        }
    }

    /// Locate `window` and the entry pointing at it in one forward pass.
    fn find_with_predecessor(&self, window: WindowHandle) -> Option<(EntryKey, EntryKey)> {
        let mut prev = self.tail?;
        for _ in 0..self.entries.len() {
            let key = self.entries[prev].next;
            if self.entries[key].window == window {
                return Some((prev, key));
            }
            prev = key;
        }
        None
    }

    fn predecessor_of(&self, target: EntryKey) -> EntryKey {
        let mut key = target;
        while self.entries[key].next != target {
            key = self.entries[key].next;
        }
        key
    }
}

/// Iterator over the ring in traversal order
pub struct Iter<'a> {
    stack: &'a WindowStack,
    at: Option<EntryKey>,
    remaining: usize,
}

impl Iterator for Iter<'_> {
    type Item = WindowHandle;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let entry = &self.stack.entries[self.at?];
        self.remaining -= 1;
        self.at = Some(entry.next);
        Some(entry.window)
    }
}
