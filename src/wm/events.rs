//! Events Module
//!
//! The reactive core: one event in, one handler run to completion, repeat
//! until the quit binding stops the loop.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::wm::WindowHandle;
use crate::wm::display::WindowSystem;
use crate::wm::keyboard::{Action, KeyBinding, Modifiers, find_binding};
use crate::wm::spawn::Launcher;
use crate::wm::stack::WindowStack;

/// Windowing-system events, classified by kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WmEvent {
    /// A grabbed key chord was pressed
    KeyPress { keycode: u8, state: Modifiers },
    /// A top-level window asks to become visible
    MapRequest(WindowHandle),
    /// A window has been destroyed
    DestroyNotify(WindowHandle),
    /// The server's keycode -> keysym table changed
    KeyboardMappingChanged,
    /// Any kind we have no handler for
    Other,
}

/// Dispatcher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Stopped,
}

/// Owns the window ring and routes events to their handlers
pub struct Dispatcher<W, L> {
    display: W,
    launcher: L,
    stack: WindowStack,
    bindings: Vec<KeyBinding>,
    state: RunState,
}

impl<W: WindowSystem, L: Launcher> Dispatcher<W, L> {
    /// Register the binding table with the windowing system, adopt windows
    /// that are already on screen and enter the running state.
    pub fn setup(display: W, launcher: L, bindings: Vec<KeyBinding>) -> Result<Self> {
        let mut dispatcher = Self {
            display,
            launcher,
            stack: WindowStack::new(),
            bindings,
            state: RunState::Running,
        };

        dispatcher.grab_bindings().context("Failed to grab key bindings")?;

        let existing = dispatcher
            .display
            .existing_windows()
            .context("Failed to query existing windows")?;
        for window in existing {
            debug!("Adopting existing window {}", window);
            dispatcher.on_map_request(window);
        }

        dispatcher.display.flush()?;
        info!(
            "Dispatcher ready: {} bindings, {} windows adopted",
            dispatcher.bindings.len(),
            dispatcher.stack.len()
        );

        Ok(dispatcher)
    }

    /// Process events until stopped.
    ///
    /// Only a failure to read the next event ends the loop early.
    pub fn run(&mut self) -> Result<()> {
        info!("Entering event loop");
        while self.state == RunState::Running {
            let event = self.display.next_event()?;
            self.handle_event(event);
            best_effort("flush", self.display.flush());
        }
        info!("Event loop stopped");
        Ok(())
    }

    /// Route one event to its handler
    pub fn handle_event(&mut self, event: WmEvent) {
        match event {
            WmEvent::KeyPress { keycode, state } => self.on_key_press(keycode, state),
            WmEvent::MapRequest(window) => self.on_map_request(window),
            WmEvent::DestroyNotify(window) => self.on_destroy_notify(window),
            WmEvent::KeyboardMappingChanged => self.on_keyboard_mapping(),
            WmEvent::Other => {}
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> RunState {
        self.state
    }

    #[cfg(test)]
    pub fn stack(&self) -> &WindowStack {
        &self.stack
    }

    #[cfg(test)]
    pub fn display(&self) -> &W {
        &self.display
    }

    #[cfg(test)]
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    fn grab_bindings(&mut self) -> Result<()> {
        for binding in &self.bindings {
            self.display.grab_key(binding.keysym, binding.modifiers)?;
        }
        Ok(())
    }

    fn on_key_press(&mut self, keycode: u8, state: Modifiers) {
        let Some(keysym) = self.display.keysym_for(keycode) else {
            debug!("KeyPress: keycode {} has no keysym", keycode);
            return;
        };

        debug!("KeyPress: keycode={}, keysym=0x{:x}, state={:?}", keycode, keysym, state);

        let action = find_binding(&self.bindings, keysym, state).map(|b| b.action.clone());
        if let Some(action) = action {
            self.run_action(&action);
        }
    }

    fn run_action(&mut self, action: &Action) {
        match action {
            Action::Spawn(argv) => self.launcher.launch(argv),
            Action::CloseCurrent => self.close_current(),
            Action::Cycle => {
                self.stack.cycle();
                self.refocus();
            }
            Action::Quit => self.quit(),
        }
    }

    fn on_map_request(&mut self, window: WindowHandle) {
        debug!("MapRequest for window {}", window);

        let (width, height) = self.display.display_size();
        best_effort(
            "move/resize",
            self.display
                .move_resize_window(window, 0, 0, width.into(), height.into()),
        );
        best_effort("map", self.display.show_window(window));

        match self.stack.insert(window) {
            Ok(()) => self.publish_clients(),
            Err(e) => debug!("{}", e),
        }
        self.refocus();
    }

    fn on_destroy_notify(&mut self, window: WindowHandle) {
        if !self.stack.remove(window) {
            debug!("DestroyNotify for unmanaged window {}", window);
            return;
        }

        debug!("DestroyNotify for window {}", window);
        self.publish_clients();
        self.refocus();
    }

    fn on_keyboard_mapping(&mut self) {
        best_effort("keyboard refresh", self.display.refresh_keyboard());
        best_effort("key grabs", self.grab_bindings());
    }

    fn close_current(&mut self) {
        let Some(window) = self.stack.current() else {
            return;
        };

        info!("Closing window {}", window);
        best_effort("close request", self.display.send_close_request(window));
        self.stack.remove(window);
        self.publish_clients();
        self.refocus();
    }

    /// Ask every window to close, forget them all and stop the loop.
    fn quit(&mut self) {
        if self.stack.is_empty() {
            info!("Quitting");
        } else {
            info!("Quitting, closing {} windows", self.stack.len());
        }

        while let Some(window) = self.stack.current() {
            best_effort("close request", self.display.send_close_request(window));
            self.stack.remove(window);
        }

        self.publish_clients();
        best_effort("active window", self.display.publish_active_window(None));
        self.state = RunState::Stopped;
    }

    /// Raise and focus the current window so the screen matches the ring.
    fn refocus(&mut self) {
        let Some(window) = self.stack.current() else {
            best_effort("active window", self.display.publish_active_window(None));
            return;
        };

        best_effort("raise", self.display.raise_window(window));
        best_effort("focus", self.display.set_input_focus(window));
        best_effort("active window", self.display.publish_active_window(Some(window)));
    }

    fn publish_clients(&mut self) {
        let windows: Vec<WindowHandle> = self.stack.iter().collect();
        best_effort("client list", self.display.publish_client_list(&windows));
    }
}

fn best_effort(what: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!("{} failed: {:#}", what, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::keyboard::{KeyboardMap, Keysym, XK_RETURN, XK_TAB};
    use anyhow::anyhow;
    use std::collections::VecDeque;

    const XK_Q: Keysym = 0x71;
    const XK_C: Keysym = 0x63;

    // Fake keyboard: keycode 24 = q, 23 = Tab, 36 = Return, 54 = c
    const KC_Q: u8 = 24;
    const KC_TAB: u8 = 23;
    const KC_RETURN: u8 = 36;
    const KC_C: u8 = 54;

    const A: WindowHandle = WindowHandle(0x100);
    const B: WindowHandle = WindowHandle(0x200);
    const C: WindowHandle = WindowHandle(0x300);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Grab(Keysym, Modifiers),
        RefreshKeyboard,
        Show(WindowHandle),
        MoveResize(WindowHandle, i32, i32, u32, u32),
        Raise(WindowHandle),
        Focus(WindowHandle),
        Close(WindowHandle),
        ClientList(Vec<WindowHandle>),
        Active(Option<WindowHandle>),
    }

    #[derive(Default)]
    struct FakeDisplay {
        events: VecDeque<WmEvent>,
        existing: Vec<WindowHandle>,
        keyboard: KeyboardMap,
        calls: Vec<Call>,
    }

    impl FakeDisplay {
        fn new() -> Self {
            let mut keysyms = vec![0; 64];
            keysyms[(KC_Q - 8) as usize] = XK_Q;
            keysyms[(KC_TAB - 8) as usize] = XK_TAB;
            keysyms[(KC_RETURN - 8) as usize] = XK_RETURN;
            keysyms[(KC_C - 8) as usize] = XK_C;
            Self {
                keyboard: KeyboardMap::new(8, 1, keysyms),
                ..Default::default()
            }
        }

        fn with_events(events: impl IntoIterator<Item = WmEvent>) -> Self {
            Self {
                events: events.into_iter().collect(),
                ..Self::new()
            }
        }

        /// Window-affecting calls only, EWMH bookkeeping filtered out
        fn window_calls(&self) -> Vec<Call> {
            self.calls
                .iter()
                .filter(|c| !matches!(c, Call::ClientList(_) | Call::Active(_)))
                .cloned()
                .collect()
        }
    }

    impl WindowSystem for FakeDisplay {
        fn next_event(&mut self) -> Result<WmEvent> {
            self.events.pop_front().ok_or_else(|| anyhow!("connection closed"))
        }

        fn display_size(&self) -> (u16, u16) {
            (1920, 1080)
        }

        fn keysym_for(&self, keycode: u8) -> Option<Keysym> {
            self.keyboard.keysym(keycode)
        }

        fn grab_key(&mut self, keysym: Keysym, modifiers: Modifiers) -> Result<()> {
            self.calls.push(Call::Grab(keysym, modifiers));
            Ok(())
        }

        fn refresh_keyboard(&mut self) -> Result<()> {
            self.calls.push(Call::RefreshKeyboard);
            Ok(())
        }

        fn existing_windows(&mut self) -> Result<Vec<WindowHandle>> {
            Ok(self.existing.clone())
        }

        fn show_window(&mut self, window: WindowHandle) -> Result<()> {
            self.calls.push(Call::Show(window));
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
            self.calls.push(Call::MoveResize(window, x, y, width, height));
            Ok(())
        }

        fn raise_window(&mut self, window: WindowHandle) -> Result<()> {
            self.calls.push(Call::Raise(window));
            Ok(())
        }

        fn set_input_focus(&mut self, window: WindowHandle) -> Result<()> {
            self.calls.push(Call::Focus(window));
            Ok(())
        }

        fn send_close_request(&mut self, window: WindowHandle) -> Result<()> {
            self.calls.push(Call::Close(window));
            Ok(())
        }

        fn publish_client_list(&mut self, windows: &[WindowHandle]) -> Result<()> {
            self.calls.push(Call::ClientList(windows.to_vec()));
            Ok(())
        }

        fn publish_active_window(&mut self, window: Option<WindowHandle>) -> Result<()> {
            self.calls.push(Call::Active(window));
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        launched: Vec<Vec<String>>,
    }

    impl Launcher for FakeLauncher {
        fn launch(&mut self, argv: &[String]) {
            self.launched.push(argv.to_vec());
        }
    }

    fn bindings() -> Vec<KeyBinding> {
        vec![
            KeyBinding::new(XK_Q, Modifiers::MOD1, Action::Quit),
            KeyBinding::new(XK_TAB, Modifiers::MOD1, Action::Cycle),
            KeyBinding::new(XK_RETURN, Modifiers::MOD1, Action::Spawn(vec!["st".into()])),
            KeyBinding::new(XK_C, Modifiers::MOD1 | Modifiers::SHIFT, Action::CloseCurrent),
        ]
    }

    fn dispatcher(display: FakeDisplay) -> Dispatcher<FakeDisplay, FakeLauncher> {
        Dispatcher::setup(display, FakeLauncher::default(), bindings()).unwrap()
    }

    /// Dispatcher with `windows` mapped in order and the call log cleared
    fn with_windows(windows: &[WindowHandle]) -> Dispatcher<FakeDisplay, FakeLauncher> {
        let mut d = dispatcher(FakeDisplay::new());
        for &w in windows {
            d.handle_event(WmEvent::MapRequest(w));
        }
        d.display.calls.clear();
        d
    }

    fn press(keycode: u8, state: Modifiers) -> WmEvent {
        WmEvent::KeyPress { keycode, state }
    }

    #[test]
    fn test_setup_grabs_every_binding_in_order() {
        let d = dispatcher(FakeDisplay::new());
        let grabs: Vec<_> = bindings()
            .into_iter()
            .map(|b| Call::Grab(b.keysym, b.modifiers))
            .collect();
        assert_eq!(d.display().calls, grabs);
        assert_eq!(d.state(), RunState::Running);
        assert!(d.stack().is_empty());
    }

    #[test]
    fn test_setup_adopts_existing_windows() {
        let display = FakeDisplay {
            existing: vec![A, B],
            ..FakeDisplay::new()
        };
        let d = dispatcher(display);
        assert_eq!(d.stack().current(), Some(B));
        assert!(d.stack().exists(A));
        assert!(d.display().calls.contains(&Call::MoveResize(A, 0, 0, 1920, 1080)));
    }

    #[test]
    fn test_map_request_fills_screen_and_focuses() {
        let mut d = with_windows(&[]);
        d.handle_event(WmEvent::MapRequest(A));

        assert_eq!(
            d.display().window_calls(),
            vec![
                Call::MoveResize(A, 0, 0, 1920, 1080),
                Call::Show(A),
                Call::Raise(A),
                Call::Focus(A),
            ]
        );
        assert!(d.display().calls.contains(&Call::ClientList(vec![A])));
        assert!(d.display().calls.contains(&Call::Active(Some(A))));
        assert_eq!(d.stack().current(), Some(A));
    }

    #[test]
    fn test_duplicate_map_request_keeps_one_entry() {
        let mut d = with_windows(&[A, B]);
        d.handle_event(WmEvent::MapRequest(A));
        assert_eq!(d.stack().len(), 2);
        // Focus stays where the ring says it is
        assert_eq!(d.stack().current(), Some(B));
        assert!(d.display().calls.contains(&Call::Focus(B)));
    }

    #[test]
    fn test_key_press_fires_binding_once() {
        let mut d = with_windows(&[]);
        d.handle_event(press(KC_RETURN, Modifiers::MOD1));
        assert_eq!(d.launcher().launched, vec![vec!["st".to_string()]]);

        // Same key with an extra modifier is a different chord
        d.handle_event(press(KC_RETURN, Modifiers::MOD1 | Modifiers::SHIFT));
        d.handle_event(press(KC_RETURN, Modifiers::empty()));
        assert_eq!(d.launcher().launched.len(), 1);
    }

    #[test]
    fn test_quit_requires_exact_mask() {
        let mut d = with_windows(&[A]);
        d.handle_event(press(KC_Q, Modifiers::MOD1 | Modifiers::SHIFT));
        assert_eq!(d.state(), RunState::Running);
        assert_eq!(d.stack().len(), 1);

        d.handle_event(press(KC_Q, Modifiers::MOD1));
        assert_eq!(d.state(), RunState::Stopped);
    }

    #[test]
    fn test_unbound_and_unknown_events_are_ignored() {
        let mut d = with_windows(&[A]);
        d.handle_event(WmEvent::Other);
        d.handle_event(press(KC_C, Modifiers::MOD1));
        d.handle_event(press(99, Modifiers::MOD1));
        assert!(d.display().calls.is_empty());
        assert!(d.launcher().launched.is_empty());
        assert_eq!(d.stack().current(), Some(A));
    }

    #[test]
    fn test_destroy_of_untracked_window_is_noop() {
        let mut d = with_windows(&[A, B]);
        d.handle_event(WmEvent::DestroyNotify(C));
        assert!(d.display().calls.is_empty());
        assert_eq!(d.stack().len(), 2);
        assert_eq!(d.stack().current(), Some(B));
    }

    #[test]
    fn test_destroy_of_current_focuses_predecessor() {
        let mut d = with_windows(&[A, B, C]);
        // Ring is C -> B -> A, so A precedes C
        d.handle_event(WmEvent::DestroyNotify(C));
        assert_eq!(d.stack().current(), Some(A));
        assert_eq!(d.display().window_calls(), vec![Call::Raise(A), Call::Focus(A)]);
        assert!(d.display().calls.contains(&Call::ClientList(vec![A, B])));
    }

    #[test]
    fn test_destroy_of_last_window_clears_focus() {
        let mut d = with_windows(&[A]);
        d.handle_event(WmEvent::DestroyNotify(A));
        assert!(d.stack().is_empty());
        assert!(d.display().window_calls().is_empty());
        assert!(d.display().calls.contains(&Call::Active(None)));
    }

    #[test]
    fn test_cycle_binding_moves_focus() {
        let mut d = with_windows(&[A, B, C]);
        d.handle_event(press(KC_TAB, Modifiers::MOD1));
        assert_eq!(d.stack().current(), Some(B));
        assert_eq!(d.display().window_calls(), vec![Call::Raise(B), Call::Focus(B)]);

        d.handle_event(press(KC_TAB, Modifiers::MOD1));
        d.handle_event(press(KC_TAB, Modifiers::MOD1));
        assert_eq!(d.stack().current(), Some(C));
    }

    #[test]
    fn test_cycle_on_empty_stack_does_nothing() {
        let mut d = with_windows(&[]);
        d.handle_event(press(KC_TAB, Modifiers::MOD1));
        assert!(d.display().window_calls().is_empty());
        assert_eq!(d.stack().current(), None);
    }

    #[test]
    fn test_close_current_requests_close_and_refocuses() {
        let mut d = with_windows(&[A, B]);
        d.handle_event(press(KC_C, Modifiers::MOD1 | Modifiers::SHIFT));
        assert_eq!(
            d.display().window_calls(),
            vec![Call::Close(B), Call::Raise(A), Call::Focus(A)]
        );
        assert!(!d.stack().exists(B));

        // The client then complies; its destroy notify is now untracked
        d.display.calls.clear();
        d.handle_event(WmEvent::DestroyNotify(B));
        assert!(d.display().calls.is_empty());
        assert_eq!(d.stack().current(), Some(A));
    }

    #[test]
    fn test_close_current_on_empty_stack() {
        let mut d = with_windows(&[]);
        d.handle_event(press(KC_C, Modifiers::MOD1 | Modifiers::SHIFT));
        assert!(d.display().calls.is_empty());
    }

    #[test]
    fn test_quit_closes_every_window_from_current_backwards() {
        let mut d = with_windows(&[A, B, C]);
        d.handle_event(press(KC_Q, Modifiers::MOD1));

        // C is current; its predecessor is A, then B
        assert_eq!(
            d.display().window_calls(),
            vec![Call::Close(C), Call::Close(A), Call::Close(B)]
        );
        assert!(d.stack().is_empty());
        assert_eq!(d.state(), RunState::Stopped);
    }

    #[test]
    fn test_quit_with_no_windows_still_stops() {
        let mut d = with_windows(&[]);
        d.handle_event(press(KC_Q, Modifiers::MOD1));
        assert!(d.display().window_calls().is_empty());
        assert!(d.display().calls.contains(&Call::ClientList(vec![])));
        assert!(d.display().calls.contains(&Call::Active(None)));
        assert_eq!(d.state(), RunState::Stopped);
    }

    #[test]
    fn test_keyboard_mapping_change_regrabs() {
        let mut d = with_windows(&[]);
        d.handle_event(WmEvent::KeyboardMappingChanged);
        assert_eq!(d.display().calls.first(), Some(&Call::RefreshKeyboard));
        assert_eq!(d.display().calls.len(), 1 + bindings().len());
    }

    #[test]
    fn test_run_stops_at_quit() {
        let display = FakeDisplay::with_events([
            WmEvent::MapRequest(A),
            WmEvent::Other,
            press(KC_Q, Modifiers::MOD1),
            WmEvent::MapRequest(B),
        ]);
        let mut d = dispatcher(display);
        d.run().unwrap();

        assert_eq!(d.state(), RunState::Stopped);
        assert!(d.display().calls.contains(&Call::Close(A)));
        assert!(!d.display().calls.contains(&Call::Show(B)));
        assert_eq!(d.display().events.len(), 1, "no events read after quit");
    }

    #[test]
    fn test_run_reports_lost_connection() {
        let mut d = dispatcher(FakeDisplay::with_events([WmEvent::MapRequest(A)]));
        assert!(d.run().is_err());
        assert_eq!(d.state(), RunState::Running);
        assert_eq!(d.stack().current(), Some(A));
    }
}
