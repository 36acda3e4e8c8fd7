//! The surface state store: per-surface pending/committed buffer state,
//! geometry, and damage regions.
//!
//! A [`Surface`] is a client-owned rectangular drawable. Client requests
//! stage content into *pending* state; [`SurfaceStore::commit`] atomically
//! promotes pending state to *committed* state, which is the only state
//! composition and hit-testing ever observe. Partial commits are never
//! visible to the compositor.
//!
//! Surfaces are arena-indexed: everything outside the store refers to a
//! surface by its [`SurfaceId`], and a lookup of a destroyed id simply
//! fails with [`InvalidSurface`](crate::TrixieError::InvalidSurface), so a
//! stale reference can never dangle.

use std::fmt;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::core::client::ClientId;
use crate::core::types::{Point, Rectangle, Region, Size, Transform};
use crate::{Result, TrixieError};

/// A unique identifier for a [`Surface`].
///
/// Ids are minted by the [`SurfaceStore`] and never reused within a
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub(crate) u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A handle to client-provided content.
///
/// The core never touches pixel data; a Buffer is an opaque handle plus
/// the extent the display backend needs to composite it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffer {
    /// Backend-assigned handle for the underlying storage.
    pub handle: u64,
    /// The extent of the buffer, in buffer-local pixels.
    pub size: Size,
}

impl Buffer {
    /// Creates a new Buffer handle.
    pub const fn new(handle: u64, width: u32, height: u32) -> Buffer {
        Buffer {
            handle,
            size: Size::new(width, height),
        }
    }
}

/// A rectangular drawable region owned by a single client.
///
/// A Surface carries double-buffered state: the *pending* buffer and
/// damage staged by [`attach_pending`], and the *committed* buffer that is
/// currently eligible for composition. The committed state is only ever
/// replaced atomically by [`commit`].
///
/// [`attach_pending`]: SurfaceStore::attach_pending
/// [`commit`]: SurfaceStore::commit
#[derive(Debug, Clone)]
pub struct Surface {
    id: SurfaceId,
    owner: ClientId,

    position: Point,
    transform: Transform,
    scale: i32,
    visible: bool,

    pending_buffer: Option<Buffer>,
    pending_damage: Region,

    committed: Option<Buffer>,
    dirty: bool,
    frame_requested: bool,
}

impl Surface {
    fn new(id: SurfaceId, owner: ClientId) -> Self {
        Self {
            id,
            owner,
            position: Point::zeroed(),
            transform: Transform::Normal,
            scale: 1,
            visible: true,
            pending_buffer: None,
            pending_damage: Region::new(),
            committed: None,
            dirty: false,
            frame_requested: false,
        }
    }

    /// The surface's id.
    #[inline(always)]
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// The client that owns this surface.
    #[inline(always)]
    pub fn owner(&self) -> ClientId {
        self.owner
    }

    /// The surface's position in the global coordinate space.
    #[inline(always)]
    pub fn position(&self) -> Point {
        self.position
    }

    /// The transform applied to the committed buffer at composition.
    #[inline(always)]
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// The buffer scale of the surface.
    #[inline(always)]
    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// Whether session policy currently allows this surface on screen.
    #[inline(always)]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// The currently committed buffer, if any.
    #[inline(always)]
    pub fn committed(&self) -> Option<&Buffer> {
        self.committed.as_ref()
    }

    /// Whether a commit has happened since the surface was last composited.
    #[inline(always)]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a buffer has been attached but not yet committed.
    #[inline(always)]
    pub fn has_pending(&self) -> bool {
        self.pending_buffer.is_some()
    }

    /// Whether the owning client asked to be told when this surface is
    /// next presented.
    #[inline(always)]
    pub fn frame_requested(&self) -> bool {
        self.frame_requested
    }

    /// The extent of the committed content in the global space.
    ///
    /// A surface with no committed buffer covers no area: it is invisible
    /// to both composition and hit-testing.
    pub fn extent(&self) -> Rectangle {
        match self.committed {
            Some(buffer) => Rectangle::from_parts(self.position, self.logical_size(buffer.size)),
            None => Rectangle::zeroed(),
        }
    }

    /// Converts a buffer-local size to the logical space, accounting for
    /// the buffer scale.
    fn logical_size(&self, size: Size) -> Size {
        if self.scale <= 1 {
            size
        } else {
            size.scale(1.0 / self.scale as f32)
        }
    }
}

/// The arena of all live surfaces in a session.
///
/// The store is the single writer of surface state; the session serializes
/// all mutations through it, so commits from one client are applied in
/// strict submission order. Iteration order is insertion order, which
/// keeps everything downstream (composition, hit-testing) deterministic.
#[derive(Debug, Default)]
pub struct SurfaceStore {
    surfaces: IndexMap<SurfaceId, Surface>,
    next_id: u64,
}

impl SurfaceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            surfaces: IndexMap::new(),
            next_id: 0,
        }
    }

    /// The number of live surfaces.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    /// Tests whether the store is empty.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    /// Creates a new surface owned by `owner` and returns its id.
    pub fn create(&mut self, owner: ClientId) -> SurfaceId {
        let id = SurfaceId(self.next_id);
        self.next_id += 1;

        self.surfaces.insert(id, Surface::new(id, owner));
        debug!("created surface {} for client {}", id, owner);
        id
    }

    /// Returns a reference to the surface with the given id, if it is live.
    pub fn get(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(&id)
    }

    /// Returns a reference to the surface with the given id, or
    /// `InvalidSurface` if it is not live.
    pub fn surface(&self, id: SurfaceId) -> Result<&Surface> {
        self.surfaces.get(&id).ok_or(TrixieError::InvalidSurface(id))
    }

    fn surface_mut(&mut self, id: SurfaceId) -> Result<&mut Surface> {
        self.surfaces
            .get_mut(&id)
            .ok_or(TrixieError::InvalidSurface(id))
    }

    /// Looks up a surface on behalf of a client, failing with
    /// `InvalidSurface` if the surface does not exist *or* does not belong
    /// to the caller.
    fn owned_mut(&mut self, id: SurfaceId, client: ClientId) -> Result<&mut Surface> {
        let surface = self.surface_mut(id)?;
        if surface.owner != client {
            return Err(TrixieError::InvalidSurface(id));
        }
        Ok(surface)
    }

    /// Stages a buffer plus damage rectangles into the surface's pending
    /// state, without affecting the currently visible content.
    ///
    /// A second attach before a commit replaces the previously pending
    /// buffer. Damage rectangles are in surface-local coordinates and
    /// accumulate until the next commit.
    pub fn attach_pending(
        &mut self,
        id: SurfaceId,
        client: ClientId,
        buffer: Buffer,
        damage: &[Rectangle],
    ) -> Result<()> {
        let surface = self.owned_mut(id, client)?;

        if surface.pending_buffer.replace(buffer).is_some() {
            trace!("surface {}: pending buffer replaced before commit", id);
        }
        for rect in damage {
            surface.pending_damage.add(*rect);
        }
        Ok(())
    }

    /// Atomically promotes the surface's pending state to committed state.
    ///
    /// Returns the newly committed damage, clipped to the surface extent
    /// and translated into the global space, ready to be accumulated onto
    /// the repaint region of every output the surface is mapped to.
    ///
    /// If no buffer is pending, the previously committed buffer stays on
    /// screen and only the staged damage is promoted.
    pub fn commit(&mut self, id: SurfaceId, client: ClientId) -> Result<Region> {
        let surface = self.owned_mut(id, client)?;

        if let Some(buffer) = surface.pending_buffer.take() {
            // the whole surface is damaged if the content extent changed
            let replaced = surface.committed.replace(buffer);
            if replaced.map(|b| b.size) != Some(buffer.size) {
                surface
                    .pending_damage
                    .add(Rectangle::from_parts(Point::zeroed(), buffer.size));
            }
        }

        let extent = surface.extent();
        let staged = surface.pending_damage.take();
        let local = staged.clipped_to(&Rectangle::from_parts(Point::zeroed(), extent.size));
        let global = local.translate(extent.point.x, extent.point.y);

        surface.dirty = true;
        trace!("surface {} committed, {} damage rects", id, global.rects().len());
        Ok(global)
    }

    /// Requests a presentation notification for the surface's next
    /// composited frame.
    pub fn request_frame(&mut self, id: SurfaceId, client: ClientId) -> Result<()> {
        self.owned_mut(id, client)?.frame_requested = true;
        Ok(())
    }

    /// Takes the surface's frame request, if one is outstanding.
    pub(crate) fn take_frame_request(&mut self, id: SurfaceId) -> bool {
        match self.surfaces.get_mut(&id) {
            Some(surface) => std::mem::take(&mut surface.frame_requested),
            None => false,
        }
    }

    /// Clears the dirty flag after a surface has been composited.
    pub(crate) fn mark_clean(&mut self, id: SurfaceId) {
        if let Some(surface) = self.surfaces.get_mut(&id) {
            surface.dirty = false;
        }
    }

    /// Moves a surface to a new position in the global space.
    pub fn set_position(&mut self, id: SurfaceId, position: Point) -> Result<()> {
        self.surface_mut(id)?.position = position;
        Ok(())
    }

    /// Sets the transform applied at composition.
    pub fn set_transform(&mut self, id: SurfaceId, transform: Transform) -> Result<()> {
        self.surface_mut(id)?.transform = transform;
        Ok(())
    }

    /// Sets the buffer scale of a surface.
    pub fn set_scale(&mut self, id: SurfaceId, scale: i32) -> Result<()> {
        if scale < 1 {
            return Err(TrixieError::InvalidConfig(format!(
                "buffer scale must be >= 1, got {scale}"
            )));
        }
        self.surface_mut(id)?.scale = scale;
        Ok(())
    }

    /// Shows or hides a surface (session policy, e.g. minimise).
    pub fn set_visible(&mut self, id: SurfaceId, visible: bool) -> Result<()> {
        self.surface_mut(id)?.visible = visible;
        Ok(())
    }

    /// Destroys a surface.
    ///
    /// A second destroy of the same id fails with `InvalidSurface`; ids
    /// are never reused, so there is no window for confusion with a newer
    /// surface.
    pub fn destroy(&mut self, id: SurfaceId) -> Result<Surface> {
        let surface = self
            .surfaces
            .shift_remove(&id)
            .ok_or(TrixieError::InvalidSurface(id))?;
        debug!("destroyed surface {}", id);
        Ok(surface)
    }

    /// All surfaces owned by the given client, in creation order.
    pub fn surfaces_of(&self, owner: ClientId) -> Vec<SurfaceId> {
        self.surfaces
            .values()
            .filter(|s| s.owner == owner)
            .map(|s| s.id)
            .collect()
    }

    /// Iterates over all live surfaces in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Surface> {
        self.surfaces.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(n: u64) -> ClientId {
        ClientId(n)
    }

    #[test]
    fn test_attach_does_not_touch_committed() {
        let mut store = SurfaceStore::new();
        let a = client(1);
        let id = store.create(a);

        store
            .attach_pending(id, a, Buffer::new(1, 64, 64), &[])
            .unwrap();

        // still nothing committed: pending state is invisible
        assert!(store.get(id).unwrap().committed().is_none());
        assert!(store.get(id).unwrap().has_pending());

        store.commit(id, a).unwrap();
        assert_eq!(store.get(id).unwrap().committed().unwrap().handle, 1);
        assert!(!store.get(id).unwrap().has_pending());
    }

    #[test]
    fn test_commit_promotes_latest_pending() {
        let mut store = SurfaceStore::new();
        let a = client(1);
        let id = store.create(a);

        store
            .attach_pending(id, a, Buffer::new(1, 64, 64), &[])
            .unwrap();
        store
            .attach_pending(id, a, Buffer::new(2, 64, 64), &[])
            .unwrap();
        store.commit(id, a).unwrap();

        // the second attach replaced the first before the commit
        assert_eq!(store.get(id).unwrap().committed().unwrap().handle, 2);
    }

    #[test]
    fn test_commit_without_pending_keeps_content() {
        let mut store = SurfaceStore::new();
        let a = client(1);
        let id = store.create(a);

        store
            .attach_pending(id, a, Buffer::new(7, 32, 32), &[])
            .unwrap();
        store.commit(id, a).unwrap();
        store.commit(id, a).unwrap();

        assert_eq!(store.get(id).unwrap().committed().unwrap().handle, 7);
    }

    #[test]
    fn test_commit_damage_is_clipped_and_global() {
        let mut store = SurfaceStore::new();
        let a = client(1);
        let id = store.create(a);
        store.set_position(id, Point::new(100, 50)).unwrap();

        store
            .attach_pending(id, a, Buffer::new(1, 40, 40), &[])
            .unwrap();
        store.commit(id, a).unwrap();

        // damage hangs off the right edge of the 40x40 surface
        store
            .attach_pending(id, a, Buffer::new(2, 40, 40), &[Rectangle::new(30, 0, 20, 10)])
            .unwrap();
        let damage = store.commit(id, a).unwrap();

        assert_eq!(damage.rects(), &[Rectangle::new(130, 50, 10, 10)]);
    }

    #[test]
    fn test_attach_rejects_foreign_surface() {
        let mut store = SurfaceStore::new();
        let a = client(1);
        let b = client(2);
        let id = store.create(a);

        let err = store
            .attach_pending(id, b, Buffer::new(1, 8, 8), &[])
            .unwrap_err();
        assert_eq!(err, TrixieError::InvalidSurface(id));
    }

    #[test]
    fn test_double_destroy_fails() {
        let mut store = SurfaceStore::new();
        let a = client(1);
        let id = store.create(a);

        store.destroy(id).unwrap();
        assert_eq!(store.destroy(id).unwrap_err(), TrixieError::InvalidSurface(id));
    }

    #[test]
    fn test_surfaces_of_filters_by_owner() {
        let mut store = SurfaceStore::new();
        let a = client(1);
        let b = client(2);

        let s1 = store.create(a);
        let _s2 = store.create(b);
        let s3 = store.create(a);

        assert_eq!(store.surfaces_of(a), vec![s1, s3]);
    }
}
