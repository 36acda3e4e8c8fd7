//! The session controller: the single owner of all compositor state.
//!
//! A [`Session`] ties everything together: the client registry, the
//! surface store, the input router, the output manager, and the frame
//! scheduler, plus one [`DisplayBackend`] to hand composed frames to.
//! Every mutation flows through it, serialized, so commit ordering and
//! focus/delivery ordering are never in question.
//!
//! The transport layer drives a session with three calls:
//!
//! - [`Session::dispatch`] for each decoded client request;
//! - the input methods ([`pointer_motion`] and friends) for each device
//!   event;
//! - [`Session::tick`] at its cadence of choice, which sweeps
//!   unresponsive clients, advances every output's frame cycle, and
//!   drains backend acks.
//!
//! Outbound traffic (frame callbacks, delivered input, forced
//! disconnects) accumulates as [`Event`]s, drained with
//! [`Session::take_events`].
//!
//! [`pointer_motion`]: Session::pointer_motion

use std::fmt;
use std::time::Instant;

use indexmap::IndexMap;
use strum::Display;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::DisplayBackend;
use crate::config::{OutputSpec, TrixieConfig, NO_CHECKS};
use crate::core::client::{ClientId, ClientRegistry};
use crate::core::surface::{Buffer, SurfaceId, SurfaceStore};
use crate::core::types::{Point, Rectangle, Region, Transform};
use crate::frame::{FrameScheduler, FrameStep, FrameToken};
use crate::input::{InputRouter, KeyState, Modifiers};
use crate::output::{DetachReport, OutputId, OutputManager};
use crate::scene::{self, RenderList};
use crate::{Result, TrixieError};

/// The lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionState {
    /// Constructed but not yet serving; outputs are not up.
    Starting,
    /// Serving clients and scheduling frames.
    Running,
    /// Draining in-flight frames; new work is refused.
    Stopping,
    /// Fully shut down.
    Stopped,
}

/// Why a client was removed from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CloseReason {
    /// The client disconnected itself.
    Disconnected,
    /// The client went silent past the configured timeout.
    Unresponsive,
    /// The session shut down.
    Shutdown,
}

/// A decoded client request, ready for dispatch.
///
/// The transport layer decodes protocol messages into these; the session
/// neither knows nor cares what the bytes looked like.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Create a new surface owned by the requesting client.
    CreateSurface,
    /// Stage a buffer plus damage into a surface's pending state.
    Attach {
        /// The surface to attach to.
        surface: SurfaceId,
        /// The new content.
        buffer: Buffer,
        /// Changed areas, in surface-local coordinates.
        damage: Vec<Rectangle>,
    },
    /// Atomically promote a surface's pending state.
    Commit {
        /// The surface to commit.
        surface: SurfaceId,
    },
    /// Ask to be notified when the surface is next presented.
    Frame {
        /// The surface to watch.
        surface: SurfaceId,
    },
    /// Move a surface in the global space.
    SetPosition {
        /// The surface to move.
        surface: SurfaceId,
        /// The new top-left corner.
        position: Point,
    },
    /// Set a surface's buffer scale.
    SetScale {
        /// The surface to change.
        surface: SurfaceId,
        /// The new scale, at least 1.
        scale: i32,
    },
    /// Set the transform applied at composition.
    SetTransform {
        /// The surface to change.
        surface: SurfaceId,
        /// The new transform.
        transform: Transform,
    },
    /// Destroy a surface.
    Destroy {
        /// The surface to destroy.
        surface: SurfaceId,
    },
}

/// The successful outcome of a dispatched [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// The request completed with nothing to report.
    Done,
    /// A surface was created.
    SurfaceCreated(SurfaceId),
}

/// Outbound traffic for the transport layer to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A surface that asked for a frame callback was presented.
    FrameDone {
        /// The owner to notify.
        client: ClientId,
        /// The presented surface.
        surface: SurfaceId,
    },
    /// The pointer moved over a surface.
    PointerMotion {
        /// The surface under the pointer.
        surface: SurfaceId,
        /// The pointer position, in global coordinates.
        position: Point,
    },
    /// A pointer button changed state over a surface.
    PointerButton {
        /// The surface under the pointer.
        surface: SurfaceId,
        /// The button code.
        button: u32,
        /// Pressed or released.
        state: KeyState,
    },
    /// A key event reached the keyboard-focused surface.
    Key {
        /// The focused surface.
        surface: SurfaceId,
        /// The key code.
        keycode: u32,
        /// Pressed or released.
        state: KeyState,
        /// The modifiers held at the time.
        modifiers: Modifiers,
    },
    /// A touch contact event reached its pinned surface.
    Touch {
        /// The pinned surface.
        surface: SurfaceId,
        /// The contact id.
        contact: u32,
        /// Down, moved or lifted.
        phase: TouchPhase,
    },
    /// A client was removed from the session.
    ClientClosed {
        /// The removed client.
        client: ClientId,
        /// Why it was removed.
        reason: CloseReason,
    },
}

/// The lifecycle phase of a touch contact event.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TouchPhase {
    Down,
    Motion,
    Up,
}

/// The compositor session: one seat, many clients, many outputs.
pub struct Session<B: DisplayBackend> {
    state: SessionState,
    config: TrixieConfig,

    clients: ClientRegistry,
    surfaces: SurfaceStore,
    outputs: OutputManager,
    input: InputRouter,
    scheduler: FrameScheduler,
    backend: B,

    /// Surfaces included in each in-flight frame, so frame callbacks can
    /// fire when the frame's ack arrives.
    in_flight: IndexMap<FrameToken, Vec<SurfaceId>>,
    events: Vec<Event>,
}

impl<B: DisplayBackend> fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("clients", &self.clients.len())
            .field("surfaces", &self.surfaces.len())
            .field("outputs", &self.outputs.len())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl<B: DisplayBackend> Session<B> {
    /// Creates a session in the `Starting` state.
    ///
    /// The config is validated; outputs are not brought up until
    /// [`start`](Session::start).
    pub fn new(config: TrixieConfig, backend: B) -> Result<Self> {
        config.validate(NO_CHECKS)?;
        Ok(Self {
            state: SessionState::Starting,
            clients: ClientRegistry::new(config.max_clients()),
            scheduler: FrameScheduler::new(config.collect_budget()),
            config,
            surfaces: SurfaceStore::new(),
            outputs: OutputManager::new(),
            input: InputRouter::new(),
            backend,
            in_flight: IndexMap::new(),
            events: Vec::new(),
        })
    }

    /// Brings up the configured outputs and begins serving.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Starting {
            return Err(TrixieError::FatalSession(format!(
                "cannot start a {} session",
                self.state
            )));
        }

        for spec in self.config.outputs().to_vec() {
            self.attach_output(spec);
        }
        self.state = SessionState::Running;
        info!("session running with {} outputs", self.outputs.len());
        Ok(())
    }

    /// The session's lifecycle state.
    #[inline(always)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session is serving.
    #[inline(always)]
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// The client registry.
    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// The surface store.
    pub fn surfaces(&self) -> &SurfaceStore {
        &self.surfaces
    }

    /// The output manager.
    pub fn outputs(&self) -> &OutputManager {
        &self.outputs
    }

    /// The input router.
    pub fn input(&self) -> &InputRouter {
        &self.input
    }

    /// The display backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the display backend.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Frame tokens minted but not yet retired, across all outputs.
    pub fn live_frame_tokens(&self) -> Vec<FrameToken> {
        self.scheduler.live_tokens()
    }

    /// Drains the outbound event queue.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state != SessionState::Running {
            return Err(TrixieError::FatalSession(format!(
                "session is {}, refusing new work",
                self.state
            )));
        }
        Ok(())
    }

    // ------- clients -------

    /// Admits a new client connection.
    pub fn connect(&mut self, now: Instant) -> Result<ClientId> {
        self.ensure_running()?;
        self.clients.admit(now)
    }

    /// Disconnects a client at its own request.
    pub fn disconnect(&mut self, client: ClientId) -> Result<()> {
        self.clients.client(client)?;
        self.remove_client(client, CloseReason::Disconnected);
        Ok(())
    }

    /// Removes a client and everything it owns, in an order that can
    /// never leave a dangling reference: focus first, then output stacks,
    /// then the surfaces themselves, then the registry entry.
    fn remove_client(&mut self, client: ClientId, reason: CloseReason) {
        for sid in self.surfaces.surfaces_of(client) {
            self.remove_surface(sid);
        }
        self.clients.remove(client);
        self.events.push(Event::ClientClosed { client, reason });
        info!("client {} closed ({})", client, reason);
    }

    /// Tears down one surface: damage its old area, clear focus, unmap,
    /// destroy.
    fn remove_surface(&mut self, sid: SurfaceId) {
        if let Some(surface) = self.surfaces.get(sid) {
            let extent = surface.extent();
            self.outputs
                .accumulate_damage(sid, &Region::from_rect(extent));
        }
        self.input.clear_surface(sid);
        self.outputs.remove_surface(sid);
        // the id was just looked up, so the destroy cannot fail
        let _ = self.surfaces.destroy(sid);
    }

    // ------- requests -------

    /// Dispatches one decoded client request.
    ///
    /// Errors are protocol errors for the *offending client only*; the
    /// session itself never stops over one.
    #[instrument(level = "debug", skip(self))]
    pub fn dispatch(&mut self, client: ClientId, request: Request, now: Instant) -> Result<Response> {
        self.ensure_running()?;
        self.clients.mark_active(client, now)?;

        match request {
            Request::CreateSurface => {
                let sid = self.surfaces.create(client);
                Ok(Response::SurfaceCreated(sid))
            }
            Request::Attach {
                surface,
                buffer,
                damage,
            } => {
                self.surfaces.attach_pending(surface, client, buffer, &damage)?;
                Ok(Response::Done)
            }
            Request::Commit { surface } => {
                let damage = self.surfaces.commit(surface, client)?;
                self.outputs.accumulate_damage(surface, &damage);
                Ok(Response::Done)
            }
            Request::Frame { surface } => {
                self.surfaces.request_frame(surface, client)?;
                Ok(Response::Done)
            }
            Request::SetPosition { surface, position } => {
                self.owned(surface, client)?;
                self.with_extent_damage(surface, |s| s.set_position(surface, position))?;
                Ok(Response::Done)
            }
            Request::SetScale { surface, scale } => {
                self.owned(surface, client)?;
                self.with_extent_damage(surface, |s| s.set_scale(surface, scale))?;
                Ok(Response::Done)
            }
            Request::SetTransform { surface, transform } => {
                self.owned(surface, client)?;
                self.with_extent_damage(surface, |s| s.set_transform(surface, transform))?;
                Ok(Response::Done)
            }
            Request::Destroy { surface } => {
                self.owned(surface, client)?;
                self.remove_surface(surface);
                Ok(Response::Done)
            }
        }
    }

    /// Checks that `surface` is live and belongs to `client`.
    fn owned(&self, surface: SurfaceId, client: ClientId) -> Result<()> {
        if self.surfaces.surface(surface)?.owner() != client {
            return Err(TrixieError::InvalidSurface(surface));
        }
        Ok(())
    }

    /// Runs a geometry mutation, damaging both the old and the new
    /// extent so every affected output repaints.
    fn with_extent_damage<F>(&mut self, sid: SurfaceId, op: F) -> Result<()>
    where
        F: FnOnce(&mut SurfaceStore) -> Result<()>,
    {
        let before = self.surfaces.surface(sid)?.extent();
        op(&mut self.surfaces)?;
        let after = self.surfaces.surface(sid)?.extent();

        let mut damage = Region::from_rect(before);
        damage.add(after);
        self.outputs.accumulate_damage(sid, &damage);
        Ok(())
    }

    // ------- input -------

    /// Routes pointer motion, updating pointer focus on the way.
    pub fn pointer_motion(&mut self, position: Point) -> Option<SurfaceId> {
        let target = self
            .input
            .pointer_motion(position, &self.surfaces, &self.outputs);
        if let Some(surface) = target {
            self.events.push(Event::PointerMotion { surface, position });
        }
        target
    }

    /// Routes a pointer button event; a press also moves keyboard focus
    /// (click-to-focus).
    pub fn pointer_button(&mut self, button: u32, state: KeyState) -> Option<SurfaceId> {
        let target = self.input.pointer_button(button, state);
        if let Some(surface) = target {
            self.events.push(Event::PointerButton {
                surface,
                button,
                state,
            });
        }
        target
    }

    /// Routes a key event to the keyboard-focused surface, if any.
    pub fn keyboard_key(&mut self, keycode: u32, state: KeyState) -> Option<SurfaceId> {
        let target = self.input.keyboard_key(keycode, state);
        if let Some(surface) = target {
            self.events.push(Event::Key {
                surface,
                keycode,
                state,
                modifiers: self.input.modifiers(),
            });
        }
        target
    }

    /// Updates the modifier state carried on subsequent key events.
    pub fn set_modifiers(&mut self, modifiers: Modifiers) {
        self.input.set_modifiers(modifiers);
    }

    /// Explicitly moves keyboard focus, overriding click-to-focus.
    ///
    /// The target must be a live surface (or `None` to unfocus).
    pub fn set_keyboard_focus(&mut self, focus: Option<SurfaceId>) -> Result<()> {
        if let Some(sid) = focus {
            self.surfaces.surface(sid)?;
        }
        self.input.set_keyboard_focus(focus);
        Ok(())
    }

    /// Begins a touch contact.
    pub fn touch_down(&mut self, contact: u32, position: Point) -> Option<SurfaceId> {
        let target = self
            .input
            .touch_down(contact, position, &self.surfaces, &self.outputs);
        if let Some(surface) = target {
            self.events.push(Event::Touch {
                surface,
                contact,
                phase: TouchPhase::Down,
            });
        }
        target
    }

    /// Routes motion of an active touch contact.
    pub fn touch_motion(&mut self, contact: u32) -> Option<SurfaceId> {
        let target = self.input.touch_motion(contact);
        if let Some(surface) = target {
            self.events.push(Event::Touch {
                surface,
                contact,
                phase: TouchPhase::Motion,
            });
        }
        target
    }

    /// Ends a touch contact.
    pub fn touch_up(&mut self, contact: u32) -> Option<SurfaceId> {
        let target = self.input.touch_up(contact);
        if let Some(surface) = target {
            self.events.push(Event::Touch {
                surface,
                contact,
                phase: TouchPhase::Up,
            });
        }
        target
    }

    // ------- outputs -------

    /// Hotplug-attaches a new output and starts scheduling frames on it.
    pub fn attach_output(&mut self, spec: OutputSpec) -> OutputId {
        let id = self
            .outputs
            .attach(spec.name, spec.mode, spec.scale, spec.position);
        self.scheduler.track(id);
        id
    }

    /// Hotplug-detaches an output.
    ///
    /// Any frame in flight on it is dropped. Surfaces mapped only there
    /// are reassigned to a fallback output (when configured and one
    /// survives) or left unmapped; they are never destroyed.
    #[instrument(level = "debug", skip(self))]
    pub fn detach_output(&mut self, id: OutputId) -> Result<DetachReport> {
        if let Some(token) = self.scheduler.untrack(id) {
            self.in_flight.shift_remove(&token);
        }

        let report = self
            .outputs
            .detach(id, self.config.fallback_on_detach())?;

        // reassigned surfaces need a repaint on their new home
        for sid in &report.reassigned {
            if let Some(surface) = self.surfaces.get(*sid) {
                let extent = surface.extent();
                self.outputs
                    .accumulate_damage(*sid, &Region::from_rect(extent));
            }
        }
        Ok(report)
    }

    /// Replaces an output's surface stack with an explicit back-to-front
    /// order, repainting the whole output.
    pub fn set_surface_order(&mut self, id: OutputId, stack: Vec<SurfaceId>) -> Result<()> {
        for sid in &stack {
            self.surfaces.surface(*sid)?;
        }
        self.outputs.set_surface_order(id, stack)?;

        let rect = self.outputs.output(id)?.rect();
        self.outputs.add_output_damage(id, &Region::from_rect(rect));
        Ok(())
    }

    // ------- frame pump -------

    /// Advances the session by one tick.
    ///
    /// Sweeps unresponsive clients, starts and advances frame cycles on
    /// every output, submits composed frames to the backend, and drains
    /// its acks. During `Stopping`, only in-flight frames advance; once
    /// they drain, remaining clients are disconnected and the session is
    /// `Stopped`.
    #[instrument(level = "trace", skip(self))]
    pub fn tick(&mut self, now: Instant) {
        if self.state == SessionState::Stopped || self.state == SessionState::Starting {
            return;
        }

        if self.state == SessionState::Running {
            self.sweep_idle_clients(now);
        }

        for id in self.outputs.ids() {
            self.pump_output(id);
        }
        self.drain_acks();

        if self.state == SessionState::Stopping && !self.scheduler.any_in_flight() {
            let remaining: Vec<ClientId> = self.clients.iter().map(|c| c.id()).collect();
            for client in remaining {
                self.remove_client(client, CloseReason::Shutdown);
            }
            self.state = SessionState::Stopped;
            info!("session stopped");
        }
    }

    fn sweep_idle_clients(&mut self, now: Instant) {
        let Some(timeout) = self.config.client_timeout() else {
            return;
        };
        for client in self.clients.idle_since(timeout, now) {
            warn!("client {} unresponsive for {:?}, closing", client, timeout);
            self.remove_client(client, CloseReason::Unresponsive);
        }
    }

    fn pump_output(&mut self, id: OutputId) {
        // new cycles only start while running; a stopping session drains
        if self.state == SessionState::Running {
            let has_damage = self
                .outputs
                .get(id)
                .map(|o| !o.pending_damage().is_empty())
                .unwrap_or(false);
            if has_damage {
                self.scheduler.note_damage(id);
            }
        }

        if let FrameStep::Compose(token) = self.scheduler.tick(id) {
            let Some(output) = self.outputs.get(id) else {
                return;
            };
            let list = scene::compose(&self.surfaces, output);
            self.submit(id, token, list);
        }
    }

    fn submit(&mut self, id: OutputId, token: FrameToken, list: RenderList) {
        match self.backend.present(id, &list) {
            Ok(()) => {
                self.scheduler.presented(id);
                self.outputs.clear_damage(id);
                self.in_flight.insert(token, list.surfaces().collect());
            }
            Err(e) => {
                self.scheduler.abort(id);
                match e {
                    TrixieError::OutputLost(_) => {
                        warn!("output {} lost during present, detaching", id);
                        let _ = self.detach_output(id);
                    }
                    TrixieError::FatalSession(reason) => {
                        error!("fatal backend error on output {}: {}", id, reason);
                        self.begin_stop();
                    }
                    e => {
                        // the frame is skipped; accumulated damage
                        // survives, so the next cycle retries
                        warn!("output {}: present failed ({}), frame skipped", id, e);
                    }
                }
            }
        }
    }

    fn drain_acks(&mut self) {
        for (id, success) in self.backend.poll_acks() {
            let Some(token) = self.scheduler.ack(id, success) else {
                debug!("output {}: stale ack ignored", id);
                continue;
            };
            let Some(sids) = self.in_flight.shift_remove(&token) else {
                continue;
            };
            if !success {
                // skipped frame: repaint the whole output so the content
                // shows up in the next successful one
                let rect = self.outputs.get(id).map(|o| o.rect()).unwrap_or_default();
                self.outputs.add_output_damage(id, &Region::from_rect(rect));
                continue;
            }
            for sid in sids {
                self.surfaces.mark_clean(sid);
                if self.surfaces.take_frame_request(sid) {
                    if let Some(surface) = self.surfaces.get(sid) {
                        self.events.push(Event::FrameDone {
                            client: surface.owner(),
                            surface: sid,
                        });
                    }
                }
            }
        }
    }

    // ------- shutdown -------

    /// Begins an orderly shutdown.
    ///
    /// New connections and requests are refused immediately; in-flight
    /// frames drain over subsequent ticks, after which every client is
    /// disconnected and the state becomes `Stopped`.
    pub fn begin_stop(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        info!("session stopping, draining {} outputs", self.outputs.len());
        self.state = SessionState::Stopping;
    }
}
