//! # Trixie - a compositor core
//!
//! Trixie is the session core of a single-seat display server: a long-lived
//! state machine that multiplexes client rendering surfaces onto one or more
//! outputs and routes input events to the correct client, under strict
//! ordering constraints (frame-rate-locked composition, input-to-display
//! consistency).
//!
//! This crate deliberately contains *no* wire protocol or driver code. The
//! transport layer (which accepts connections and decodes protocol requests)
//! and the display backend (which owns GPU/DRM or virtual framebuffer
//! presentation) sit behind seams:
//!
//! - The transport hands parsed requests to [`Session::dispatch`] as
//!   [`Request`] values, and receives protocol-level acknowledgments or
//!   errors back.
//! - Presentation goes through the [`DisplayBackend`] trait, which signals
//!   vsync/acknowledgment back into the frame scheduler.
//!
//! ## Structure
//!
//! Leaf-first, the crate is organised as:
//!
//! - [`core::types`]: geometry and damage-region primitives.
//! - [`core::surface`]: per-surface pending/committed buffer state and the
//!   arena-indexed surface store.
//! - [`core::client`]: the registry of connected client endpoints.
//! - [`input`]: focus state and event routing for keyboard, pointer and
//!   touch.
//! - [`output`]: physical/virtual displays, their modes, and the z-ordered
//!   surface stack visible on each.
//! - [`scene`]: the pure render-list computation, one list per output per
//!   frame.
//! - [`frame`]: the per-output repaint state machine and frame-token
//!   lifecycle.
//! - [`session`]: the top-level controller owning everything above.
//!
//! ## Consistency model
//!
//! All mutations of shared session state (surfaces, focus, stacks) flow
//! through a single serialized dispatch point on [`Session`]. Per-output
//! scheduling is independent *data*, not independent threads, so commit
//! ordering and focus/delivery ordering stay auditable: a commit staged
//! while a frame is in flight only becomes visible at that output's next
//! collection phase, and a focus change strictly precedes the next
//! delivered event.
//!
//! [`Session::dispatch`]: session::Session::dispatch
//! [`Request`]: session::Request
//! [`Session`]: session::Session
//! [`DisplayBackend`]: backend::DisplayBackend

#![warn(
    missing_debug_implementations,
    missing_copy_implementations,
    missing_docs
)]

#[macro_use]
extern crate bitflags;

pub mod backend;
pub mod config;
pub mod core;
pub mod frame;
pub mod input;
pub mod output;
pub mod scene;
pub mod session;

pub use crate::core::types;

#[doc(inline)]
pub use crate::backend::{DisplayBackend, Headless};
#[doc(inline)]
pub use crate::config::{TrixieConfig, TrixieConfigBuilder};
#[doc(inline)]
pub use crate::session::{Request, Response, Session};

use crate::core::client::ClientId;
use crate::core::surface::SurfaceId;
use crate::output::OutputId;

use thiserror::Error;

/// Everything that could possibly go wrong while a Trixie session is running.
#[non_exhaustive]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrixieError {
    /// A stale or unknown surface id, or a surface owned by another client.
    ///
    /// Recovered locally; returned as a protocol error to the offending
    /// client only.
    #[error("invalid surface {0}")]
    InvalidSurface(SurfaceId),

    /// Received a reference to a client not tracked by the session.
    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    /// Received a reference to an output not tracked by the session.
    #[error("unknown output {0}")]
    UnknownOutput(OutputId),

    /// An admission or allocation limit was reached; the request is refused.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// The display backend could not present a frame.
    ///
    /// Non-fatal: the frame is skipped and scheduling continues.
    #[error("presentation failed on output {0}")]
    PresentationFailure(OutputId),

    /// An output was hotplug-detached with no fallback to reassign to.
    ///
    /// Its surfaces are unmapped, not destroyed; the session continues.
    #[error("output {0} lost with no fallback")]
    OutputLost(OutputId),

    /// A surface stack that would violate the total z-order on an output.
    #[error("invalid surface stack for output {0}: {1}")]
    InvalidStack(OutputId, String),

    /// One or more configuration invariants was not upheld.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unrecoverable backend loss, e.g. display subsystem death.
    ///
    /// Propagates to the session controller and triggers shutdown.
    #[error("fatal session error: {0}")]
    FatalSession(String),
}

/// The general result type used by Trixie.
pub type Result<T> = ::core::result::Result<T, TrixieError>;
