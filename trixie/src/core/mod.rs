//! Core data types used by Trixie.
//!
//! This module contains the leaf types of the compositor core: geometry
//! primitives, the surface state store, and the client registry. Everything
//! here is plain data plus invariant-preserving mutation; policy lives in
//! the [`session`](crate::session) module.

pub mod client;
pub mod surface;
pub mod types;

#[doc(inline)]
pub use client::{Client, ClientId, ClientRegistry};
#[doc(inline)]
pub use surface::{Buffer, Surface, SurfaceId, SurfaceStore};
#[doc(inline)]
pub use types::{Point, Rectangle, Region, Size, Transform};
