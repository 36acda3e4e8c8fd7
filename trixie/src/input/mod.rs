//! The input router: per-device focus state and hit-testing.
//!
//! Each input device class (keyboard, pointer, touch) carries its own
//! focus slot. Pointer focus follows the cursor via hit-testing against
//! *committed* surface state; keyboard focus follows clicks
//! (click-to-focus). Touch contacts each pin their hit-test target at
//! touch-down for the lifetime of the contact.
//!
//! Events with no focused surface are dropped, not queued: input has no
//! meaning without a recipient.

use std::fmt;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::core::surface::{SurfaceId, SurfaceStore};
use crate::core::types::Point;
use crate::output::OutputManager;

bitflags! {
    /// The keyboard modifiers held down, latched, or locked.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u8 {
        /// The Shift key.
        const SHIFT = 1 << 0;
        /// The Control key.
        const CTRL  = 1 << 1;
        /// The Alt key.
        const ALT   = 1 << 2;
        /// The Logo (Super) key.
        const LOGO  = 1 << 3;
    }
}

/// The state a key or button transitioned to.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    Released,
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyState::Pressed => write!(f, "pressed"),
            KeyState::Released => write!(f, "released"),
        }
    }
}

/// Routes device events to surfaces, one focus slot per device class.
#[derive(Debug, Default)]
pub struct InputRouter {
    keyboard_focus: Option<SurfaceId>,
    pointer_focus: Option<SurfaceId>,
    pointer_position: Point,
    modifiers: Modifiers,
    /// Active touch contacts, keyed by contact id. Each contact stays
    /// pinned to the surface it went down on until it is lifted.
    touch_contacts: IndexMap<u32, SurfaceId>,
}

impl InputRouter {
    /// Creates a router with nothing focused.
    pub fn new() -> Self {
        Self::default()
    }

    /// The surface holding keyboard focus.
    #[inline(always)]
    pub fn keyboard_focus(&self) -> Option<SurfaceId> {
        self.keyboard_focus
    }

    /// The surface under the pointer.
    #[inline(always)]
    pub fn pointer_focus(&self) -> Option<SurfaceId> {
        self.pointer_focus
    }

    /// The pointer's current position in the global space.
    #[inline(always)]
    pub fn pointer_position(&self) -> Point {
        self.pointer_position
    }

    /// The current keyboard modifier state.
    #[inline(always)]
    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// The number of active touch contacts.
    #[inline(always)]
    pub fn touch_contact_count(&self) -> usize {
        self.touch_contacts.len()
    }

    /// Finds the topmost visible surface under a point.
    ///
    /// The point selects an output first, then that output's stack is
    /// walked front-to-back; the first visible surface whose committed
    /// extent contains the point wins. A surface with no committed buffer
    /// covers no area and can never be hit. Pure with respect to all
    /// state, so repeating the query at an unchanged point always yields
    /// the same answer.
    pub fn hit_test(
        &self,
        pt: Point,
        surfaces: &SurfaceStore,
        outputs: &OutputManager,
    ) -> Option<SurfaceId> {
        let output = outputs.output_at(pt)?;
        output
            .stack()
            .iter()
            .rev()
            .copied()
            .find(|sid| match surfaces.get(*sid) {
                Some(s) => s.is_visible() && s.extent().contains(pt),
                None => false,
            })
    }

    /// Moves the pointer, re-running the hit test and updating pointer
    /// focus.
    ///
    /// Returns the surface the motion event should be delivered to, or
    /// `None` if the pointer is over no surface (the event is dropped).
    pub fn pointer_motion(
        &mut self,
        pt: Point,
        surfaces: &SurfaceStore,
        outputs: &OutputManager,
    ) -> Option<SurfaceId> {
        self.pointer_position = pt;

        let hit = self.hit_test(pt, surfaces, outputs);
        if hit != self.pointer_focus {
            trace!(
                "pointer focus {:?} -> {:?}",
                self.pointer_focus,
                hit
            );
            self.pointer_focus = hit;
        }
        hit
    }

    /// Routes a pointer button event to the surface under the pointer.
    ///
    /// A press also moves keyboard focus to the pressed surface
    /// (click-to-focus). A press over no surface clears keyboard focus.
    pub fn pointer_button(&mut self, button: u32, state: KeyState) -> Option<SurfaceId> {
        let _ = button;
        if state == KeyState::Pressed && self.keyboard_focus != self.pointer_focus {
            debug!(
                "keyboard focus {:?} -> {:?} (click)",
                self.keyboard_focus, self.pointer_focus
            );
            self.keyboard_focus = self.pointer_focus;
        }
        self.pointer_focus
    }

    /// Routes a key event to the keyboard-focused surface.
    ///
    /// Returns `None` if nothing holds keyboard focus; the event is
    /// dropped.
    pub fn keyboard_key(&self, keycode: u32, state: KeyState) -> Option<SurfaceId> {
        let _ = (keycode, state);
        self.keyboard_focus
    }

    /// Updates the modifier state accompanying key events.
    pub fn set_modifiers(&mut self, modifiers: Modifiers) {
        self.modifiers = modifiers;
    }

    /// Explicitly moves keyboard focus (session policy, e.g. on surface
    /// destruction or a focus-stealing prevention decision).
    pub fn set_keyboard_focus(&mut self, focus: Option<SurfaceId>) {
        if focus != self.keyboard_focus {
            debug!("keyboard focus {:?} -> {:?}", self.keyboard_focus, focus);
            self.keyboard_focus = focus;
        }
    }

    /// Begins a touch contact, pinning it to the surface it went down on.
    pub fn touch_down(
        &mut self,
        contact: u32,
        pt: Point,
        surfaces: &SurfaceStore,
        outputs: &OutputManager,
    ) -> Option<SurfaceId> {
        let hit = self.hit_test(pt, surfaces, outputs)?;
        self.touch_contacts.insert(contact, hit);
        Some(hit)
    }

    /// Routes motion of an active contact to its pinned surface.
    pub fn touch_motion(&self, contact: u32) -> Option<SurfaceId> {
        self.touch_contacts.get(&contact).copied()
    }

    /// Ends a touch contact, releasing its pin.
    pub fn touch_up(&mut self, contact: u32) -> Option<SurfaceId> {
        self.touch_contacts.shift_remove(&contact)
    }

    /// Drops every reference to a surface that is about to be destroyed
    /// or unmapped.
    ///
    /// Run *before* the surface leaves the store, so no focus slot can
    /// ever hold a dangling id.
    pub fn clear_surface(&mut self, id: SurfaceId) {
        if self.keyboard_focus == Some(id) {
            self.keyboard_focus = None;
        }
        if self.pointer_focus == Some(id) {
            self.pointer_focus = None;
        }
        self.touch_contacts.retain(|_, sid| *sid != id);
    }
}
