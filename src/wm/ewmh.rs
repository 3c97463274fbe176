//! EWMH (Extended Window Manager Hints) implementation
//!
//! Only the hints a single-ring window manager can honour: supporting check,
//! active window and client list. Plus the ICCCM delete protocol.

use anyhow::Result;
use tracing::debug;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::wrapper::ConnectionExt as _;

/// Holds all interned atoms
#[derive(Debug)]
pub struct Atoms {
    pub net_supported: Atom,
    pub net_client_list: Atom,
    pub net_active_window: Atom,
    pub net_supporting_wm_check: Atom,
    pub net_wm_name: Atom,
    pub wm_protocols: Atom,
    pub wm_delete_window: Atom,
    pub utf8_string: Atom,
}

impl Atoms {
    /// Intern all required atoms
    pub fn new<C: Connection>(conn: &C) -> Result<Self> {
        // Send every request before waiting on the first reply
        let net_supported = conn.intern_atom(false, b"_NET_SUPPORTED")?;
        let net_client_list = conn.intern_atom(false, b"_NET_CLIENT_LIST")?;
        let net_active_window = conn.intern_atom(false, b"_NET_ACTIVE_WINDOW")?;
        let net_supporting_wm_check = conn.intern_atom(false, b"_NET_SUPPORTING_WM_CHECK")?;
        let net_wm_name = conn.intern_atom(false, b"_NET_WM_NAME")?;
        let wm_protocols = conn.intern_atom(false, b"WM_PROTOCOLS")?;
        let wm_delete_window = conn.intern_atom(false, b"WM_DELETE_WINDOW")?;
        let utf8_string = conn.intern_atom(false, b"UTF8_STRING")?;

        Ok(Self {
            net_supported: net_supported.reply()?.atom,
            net_client_list: net_client_list.reply()?.atom,
            net_active_window: net_active_window.reply()?.atom,
            net_supporting_wm_check: net_supporting_wm_check.reply()?.atom,
            net_wm_name: net_wm_name.reply()?.atom,
            wm_protocols: wm_protocols.reply()?.atom,
            wm_delete_window: wm_delete_window.reply()?.atom,
            utf8_string: utf8_string.reply()?.atom,
        })
    }

    /// Set up _NET_SUPPORTED on root window
    pub fn setup_supported<C: Connection>(&self, conn: &C, root: Window) -> Result<()> {
        let supported = [
            self.net_supported,
            self.net_client_list,
            self.net_active_window,
            self.net_supporting_wm_check,
            self.net_wm_name,
        ];

        conn.change_property32(
            PropMode::REPLACE,
            root,
            self.net_supported,
            AtomEnum::ATOM,
            &supported,
        )?;

        Ok(())
    }

    /// Set up _NET_SUPPORTING_WM_CHECK on root and child windows
    pub fn setup_supporting_wm_check<C: Connection>(
        &self,
        conn: &C,
        root: Window,
        child: Window,
        name: &str,
    ) -> Result<()> {
        for window in [root, child] {
            conn.change_property32(
                PropMode::REPLACE,
                window,
                self.net_supporting_wm_check,
                AtomEnum::WINDOW,
                &[child],
            )?;
        }

        conn.change_property8(
            PropMode::REPLACE,
            child,
            self.net_wm_name,
            self.utf8_string,
            name.as_bytes(),
        )?;

        Ok(())
    }

    /// Update _NET_CLIENT_LIST
    pub fn update_client_list<C: Connection>(
        &self,
        conn: &C,
        root: Window,
        windows: &[Window],
    ) -> Result<()> {
        conn.change_property32(
            PropMode::REPLACE,
            root,
            self.net_client_list,
            AtomEnum::WINDOW,
            windows,
        )?;
        Ok(())
    }

    /// Update _NET_ACTIVE_WINDOW
    pub fn update_active_window<C: Connection>(
        &self,
        conn: &C,
        root: Window,
        window: Option<Window>,
    ) -> Result<()> {
        conn.change_property32(
            PropMode::REPLACE,
            root,
            self.net_active_window,
            AtomEnum::WINDOW,
            &[window.unwrap_or(x11rb::NONE)],
        )?;
        Ok(())
    }

    /// Ask a client to close itself via WM_DELETE_WINDOW
    pub fn send_delete_window<C: Connection>(&self, conn: &C, window: Window) -> Result<()> {
        let event = ClientMessageEvent::new(
            32,
            window,
            self.wm_protocols,
            [self.wm_delete_window, x11rb::CURRENT_TIME, 0, 0, 0],
        );

        // The window may already be gone; closing it is the desired outcome anyway
        if let Err(e) = conn.send_event(false, window, EventMask::NO_EVENT, event) {
            debug!("Failed to send WM_DELETE_WINDOW to window {}: {}", window, e);
        }

        Ok(())
    }
}
