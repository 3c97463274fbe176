//! Display Module
//!
//! The seam between the dispatcher and the windowing system. `X11Display`
//! owns the X connection and turns the dispatcher's commands into requests.

use anyhow::{Context, Result};
use tracing::{debug, info};
use x11rb::COPY_FROM_PARENT;
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use crate::wm::WindowHandle;
use crate::wm::events::WmEvent;
use crate::wm::ewmh::Atoms;
use crate::wm::keyboard::{KeyboardMap, Keysym, Modifiers};

/// Operations the dispatcher needs from the windowing system
pub trait WindowSystem {
    /// Block until the next event arrives
    fn next_event(&mut self) -> Result<WmEvent>;

    /// Width and height of the screen in pixels
    fn display_size(&self) -> (u16, u16);

    /// Logical key symbol for a physical keycode, ignoring shift levels
    fn keysym_for(&self, keycode: u8) -> Option<Keysym>;

    /// Ask to receive presses of `keysym` with exactly `modifiers` held
    fn grab_key(&mut self, keysym: Keysym, modifiers: Modifiers) -> Result<()>;

    /// Drop all key grabs and reload the keyboard mapping
    fn refresh_keyboard(&mut self) -> Result<()>;

    /// Top-level windows that were already visible before we started
    fn existing_windows(&mut self) -> Result<Vec<WindowHandle>>;

    fn show_window(&mut self, window: WindowHandle) -> Result<()>;

    fn move_resize_window(
        &mut self,
        window: WindowHandle,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<()>;

    fn raise_window(&mut self, window: WindowHandle) -> Result<()>;

    fn set_input_focus(&mut self, window: WindowHandle) -> Result<()>;

    /// Politely ask a client to close (WM_DELETE_WINDOW)
    fn send_close_request(&mut self, window: WindowHandle) -> Result<()>;

    fn publish_client_list(&mut self, windows: &[WindowHandle]) -> Result<()>;

    fn publish_active_window(&mut self, window: Option<WindowHandle>) -> Result<()>;

    /// Push buffered requests to the server
    fn flush(&mut self) -> Result<()>;
}

/// X11 connection registered as the window manager of the default screen
pub struct X11Display {
    conn: RustConnection,
    root: Window,
    width: u16,
    height: u16,
    atoms: Atoms,
    keyboard: KeyboardMap,
    check_window: Window,
}

impl X11Display {
    /// Connect to the X server and take over window management on its root.
    ///
    /// Fails if the server is unreachable or another window manager already
    /// selected SubstructureRedirect on the root window.
    pub fn connect(display_name: Option<&str>) -> Result<Self> {
        let (conn, screen_num) =
            RustConnection::connect(display_name).context("Failed to connect to X server")?;

        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let width = screen.width_in_pixels;
        let height = screen.height_in_pixels;

        info!("Connected to X server, screen {}, root window {}", screen_num, root);
        info!("Screen size: {}x{}", width, height);

        let mask = EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY;
        conn.change_window_attributes(root, &ChangeWindowAttributesAux::new().event_mask(mask))?
            .check()
            .context("Another window manager is already running")?;

        info!("Registered as window manager");

        let atoms = Atoms::new(&conn)?;
        atoms.setup_supported(&conn, root)?;

        // EWMH check window
        let check_window = conn.generate_id()?;
        conn.create_window(
            COPY_FROM_PARENT as u8,
            check_window,
            root,
            -1,
            -1,
            1,
            1,
            0,
            WindowClass::INPUT_ONLY,
            0,
            &Default::default(),
        )?;
        atoms.setup_supporting_wm_check(&conn, root, check_window, env!("CARGO_PKG_NAME"))?;

        let keyboard = load_keyboard_map(&conn)?;
        conn.flush()?;

        Ok(Self {
            conn,
            root,
            width,
            height,
            atoms,
            keyboard,
            check_window,
        })
    }
}

fn load_keyboard_map(conn: &RustConnection) -> Result<KeyboardMap> {
    let setup = conn.setup();
    let min_keycode = setup.min_keycode;
    let count = setup.max_keycode - min_keycode + 1;

    let reply = conn
        .get_keyboard_mapping(min_keycode, count)?
        .reply()
        .context("Failed to read keyboard mapping")?;

    Ok(KeyboardMap::new(min_keycode, reply.keysyms_per_keycode, reply.keysyms))
}

impl WindowSystem for X11Display {
    fn next_event(&mut self) -> Result<WmEvent> {
        let event = self.conn.wait_for_event().context("Lost connection to X server")?;

        let event = match event {
            Event::KeyPress(e) => WmEvent::KeyPress {
                keycode: e.detail,
                state: Modifiers::from_bits_retain(u16::from(e.state)),
            },
            Event::MapRequest(e) => WmEvent::MapRequest(WindowHandle(e.window)),
            Event::DestroyNotify(e) => WmEvent::DestroyNotify(WindowHandle(e.window)),
            Event::MappingNotify(e) if e.request == Mapping::KEYBOARD => {
                WmEvent::KeyboardMappingChanged
            }
            Event::Error(e) => {
                // Usually a request racing a window that just went away
                debug!("X11 error: {:?}", e);
                WmEvent::Other
            }
            _ => WmEvent::Other,
        };

        Ok(event)
    }

    fn display_size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    fn keysym_for(&self, keycode: u8) -> Option<Keysym> {
        self.keyboard.keysym(keycode)
    }

    fn grab_key(&mut self, keysym: Keysym, modifiers: Modifiers) -> Result<()> {
        let keycodes = self.keyboard.keycodes(keysym);
        if keycodes.is_empty() {
            debug!("No keycode produces keysym 0x{:x}, not grabbing", keysym);
        }

        for keycode in keycodes {
            self.conn.grab_key(
                true,
                self.root,
                ModMask::from(modifiers.bits()),
                keycode,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
            )?;
        }

        Ok(())
    }

    fn refresh_keyboard(&mut self) -> Result<()> {
        self.conn.ungrab_key(Grab::ANY, self.root, ModMask::ANY)?;
        self.keyboard = load_keyboard_map(&self.conn)?;
        info!("Keyboard mapping reloaded");
        Ok(())
    }

    fn existing_windows(&mut self) -> Result<Vec<WindowHandle>> {
        let tree = self.conn.query_tree(self.root)?.reply()?;

        let mut windows = Vec::new();
        for child in tree.children {
            if child == self.check_window {
                continue;
            }
            if let Ok(attrs) = self.conn.get_window_attributes(child)?.reply() {
                if attrs.map_state == MapState::VIEWABLE && !attrs.override_redirect {
                    windows.push(WindowHandle(child));
                }
            }
        }

        Ok(windows)
    }

    fn show_window(&mut self, window: WindowHandle) -> Result<()> {
        self.conn.map_window(window.0)?;
        Ok(())
    }

    fn move_resize_window(
        &mut self,
        window: WindowHandle,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.conn.configure_window(
            window.0,
            &ConfigureWindowAux::new()
                .x(x)
                .y(y)
                .width(width)
                .height(height)
                .border_width(0),
        )?;
        Ok(())
    }

    fn raise_window(&mut self, window: WindowHandle) -> Result<()> {
        self.conn.configure_window(
            window.0,
            &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
        )?;
        Ok(())
    }

    fn set_input_focus(&mut self, window: WindowHandle) -> Result<()> {
        self.conn
            .set_input_focus(InputFocus::PARENT, window.0, x11rb::CURRENT_TIME)?;
        Ok(())
    }

    fn send_close_request(&mut self, window: WindowHandle) -> Result<()> {
        self.atoms.send_delete_window(&self.conn, window.0)
    }

    fn publish_client_list(&mut self, windows: &[WindowHandle]) -> Result<()> {
        let ids: Vec<Window> = windows.iter().map(|w| w.0).collect();
        self.atoms.update_client_list(&self.conn, self.root, &ids)
    }

    fn publish_active_window(&mut self, window: Option<WindowHandle>) -> Result<()> {
        self.atoms
            .update_active_window(&self.conn, self.root, window.map(|w| w.0))
    }

    fn flush(&mut self) -> Result<()> {
        self.conn.flush()?;
        Ok(())
    }
}
