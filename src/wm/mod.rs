//! Window Manager Core
//!
//! Everything the reactive loop needs: the window ring, the key binding
//! table, the windowing-system seam and the dispatcher tying them together.

pub mod display;
pub mod events;
pub mod ewmh;
pub mod keyboard;
pub mod spawn;
pub mod stack;

use std::fmt;

/// Opaque identifier of a top-level window, as assigned by the X server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHandle(pub u32);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}
