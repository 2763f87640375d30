//! EWMH fullscreen query over X11
//!
//! Reads `_NET_ACTIVE_WINDOW` from the root window and checks whether that
//! window's `_NET_WM_STATE` contains `_NET_WM_STATE_FULLSCREEN`.

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt, Window};
use x11rb::rust_connection::RustConnection;

use redtray_core::prelude::*;

use crate::fullscreen::WindowQuery;

/// Atoms interned once at connect time
struct Atoms {
    net_active_window: Atom,
    net_wm_state: Atom,
    net_wm_state_fullscreen: Atom,
}

impl Atoms {
    fn intern(conn: &RustConnection) -> Result<Self> {
        Ok(Self {
            net_active_window: intern(conn, b"_NET_ACTIVE_WINDOW")?,
            net_wm_state: intern(conn, b"_NET_WM_STATE")?,
            net_wm_state_fullscreen: intern(conn, b"_NET_WM_STATE_FULLSCREEN")?,
        })
    }
}

fn intern(conn: &RustConnection, name: &[u8]) -> Result<Atom> {
    let atom = conn
        .intern_atom(false, name)
        .map_err(|e| Error::window_query(format!("intern {}: {}", String::from_utf8_lossy(name), e)))?
        .reply()
        .map_err(|e| Error::window_query(format!("intern {}: {}", String::from_utf8_lossy(name), e)))?
        .atom;
    Ok(atom)
}

pub struct X11FullscreenQuery {
    conn: RustConnection,
    root: Window,
    atoms: Atoms,
}

impl X11FullscreenQuery {
    /// Connect to `$DISPLAY` and intern the EWMH atoms.
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) =
            x11rb::connect(None).map_err(|e| Error::window_query(format!("connect: {}", e)))?;
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| Error::window_query(format!("no screen {}", screen_num)))?;
        let atoms = Atoms::intern(&conn)?;

        debug!("Connected to X11 screen {} (root {:#x})", screen_num, root);
        Ok(Self { conn, root, atoms })
    }

    fn active_window(&self) -> Result<Option<Window>> {
        let reply = self
            .conn
            .get_property(
                false,
                self.root,
                self.atoms.net_active_window,
                AtomEnum::WINDOW,
                0,
                1,
            )
            .map_err(|e| Error::window_query(format!("_NET_ACTIVE_WINDOW: {}", e)))?
            .reply()
            .map_err(|e| Error::window_query(format!("_NET_ACTIVE_WINDOW: {}", e)))?;

        Ok(reply
            .value32()
            .and_then(|mut values| values.next())
            .filter(|&window| window != x11rb::NONE))
    }
}

impl WindowQuery for X11FullscreenQuery {
    fn active_window_fullscreen(&mut self) -> Result<bool> {
        let Some(window) = self.active_window()? else {
            return Ok(false);
        };

        let reply = self
            .conn
            .get_property(
                false,
                window,
                self.atoms.net_wm_state,
                AtomEnum::ATOM,
                0,
                u32::MAX,
            )
            .map_err(|e| Error::window_query(format!("_NET_WM_STATE: {}", e)))?
            .reply()
            .map_err(|e| Error::window_query(format!("_NET_WM_STATE of {:#x}: {}", window, e)))?;

        let fullscreen = reply
            .value32()
            .is_some_and(|mut states| states.any(|atom| atom == self.atoms.net_wm_state_fullscreen));
        Ok(fullscreen)
    }
}
