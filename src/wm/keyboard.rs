//! Keyboard Module
//!
//! Key binding table, keysym naming and keycode/keysym translation.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Logical key identifier (X11 keysym)
pub type Keysym = u32;

// Keysym constants from X11/keysymdef.h
pub const XK_SPACE: Keysym = 0x0020;
pub const XK_BACKSPACE: Keysym = 0xFF08;
pub const XK_TAB: Keysym = 0xFF09;
pub const XK_RETURN: Keysym = 0xFF0D;
pub const XK_ESCAPE: Keysym = 0xFF1B;
pub const XK_DELETE: Keysym = 0xFFFF;
pub const XK_F1: Keysym = 0xFFBE;

bitflags! {
    /// Modifier mask as carried in the `state` field of key events
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Modifiers: u16 {
        const SHIFT = 1 << 0;
        const LOCK = 1 << 1;
        const CONTROL = 1 << 2;
        const MOD1 = 1 << 3;
        const MOD2 = 1 << 4;
        const MOD3 = 1 << 5;
        const MOD4 = 1 << 6;
        const MOD5 = 1 << 7;
    }
}

impl Modifiers {
    /// Parse a modifier name as written in the config file
    pub fn from_config_name(name: &str) -> Option<Self> {
        let modifier = match name.to_ascii_lowercase().as_str() {
            "shift" => Self::SHIFT,
            "lock" => Self::LOCK,
            "control" | "ctrl" => Self::CONTROL,
            "mod1" | "alt" => Self::MOD1,
            "mod2" => Self::MOD2,
            "mod3" => Self::MOD3,
            "mod4" | "super" => Self::MOD4,
            "mod5" => Self::MOD5,
            _ => return None,
        };
        Some(modifier)
    }
}

/// Resolve a key name to its keysym.
///
/// Single printable ASCII characters map to themselves (lowercase for
/// letters, since key presses resolve through the unshifted column).
pub fn keysym_from_name(name: &str) -> Option<Keysym> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_graphic() {
            return Some(c.to_ascii_lowercase() as Keysym);
        }
    }

    let keysym = match name.to_ascii_lowercase().as_str() {
        "space" => XK_SPACE,
        "backspace" => XK_BACKSPACE,
        "tab" => XK_TAB,
        "return" | "enter" => XK_RETURN,
        "escape" | "esc" => XK_ESCAPE,
        "delete" => XK_DELETE,
        other => {
            let n: u32 = other.strip_prefix('f')?.parse().ok()?;
            if !(1..=12).contains(&n) {
                return None;
            }
            XK_F1 + (n - 1)
        }
    };
    Some(keysym)
}

/// Action bound to a key chord
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Launch a detached process with the given argument vector
    Spawn(Vec<String>),
    /// Ask the focused window to close
    CloseCurrent,
    /// Focus the next window in the ring
    Cycle,
    /// Close everything and stop the window manager
    Quit,
}

/// One entry of the ordered binding table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBinding {
    pub keysym: Keysym,
    pub modifiers: Modifiers,
    pub action: Action,
}

impl KeyBinding {
    pub fn new(keysym: Keysym, modifiers: Modifiers, action: Action) -> Self {
        Self { keysym, modifiers, action }
    }

    /// Exact match: the pressed modifier state must equal the binding's mask.
    pub fn matches(&self, keysym: Keysym, modifiers: Modifiers) -> bool {
        self.keysym == keysym && self.modifiers == modifiers
    }
}

/// First binding in table order matching the chord
pub fn find_binding(
    bindings: &[KeyBinding],
    keysym: Keysym,
    modifiers: Modifiers,
) -> Option<&KeyBinding> {
    bindings.iter().find(|b| b.matches(keysym, modifiers))
}

/// Snapshot of the server's keycode -> keysym table
#[derive(Debug, Clone, Default)]
pub struct KeyboardMap {
    min_keycode: u8,
    keysyms_per_keycode: usize,
    keysyms: Vec<Keysym>,
}

impl KeyboardMap {
    pub fn new(min_keycode: u8, keysyms_per_keycode: u8, keysyms: Vec<Keysym>) -> Self {
        Self {
            min_keycode,
            keysyms_per_keycode: keysyms_per_keycode as usize,
            keysyms,
        }
    }

    /// Keysym in the first column for `keycode`, ignoring shift levels
    pub fn keysym(&self, keycode: u8) -> Option<Keysym> {
        let offset = keycode.checked_sub(self.min_keycode)? as usize;
        self.keysyms
            .get(offset * self.keysyms_per_keycode)
            .copied()
            .filter(|&sym| sym != 0)
    }

    /// Every keycode whose unshifted column is `keysym`, the same keycodes
    /// `keysym` resolves back from
    pub fn keycodes(&self, keysym: Keysym) -> Vec<u8> {
        if self.keysyms_per_keycode == 0 {
            return Vec::new();
        }
        self.keysyms
            .chunks(self.keysyms_per_keycode)
            .enumerate()
            .filter(|(_, syms)| syms.first() == Some(&keysym))
            .filter_map(|(i, _)| u8::try_from(i + self.min_keycode as usize).ok())
            .collect()
    }
}
