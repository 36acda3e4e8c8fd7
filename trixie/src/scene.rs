//! The scene composer: committed state in, render list out.
//!
//! [`compose`] is a pure function over the surface store and one output.
//! It never mutates anything and consults only *committed* surface state,
//! so composing the same state twice yields identical render lists. All
//! policy (what is mapped, in what order, what is visible) has already
//! been decided upstream; the composer just flattens it.

use crate::core::surface::{Buffer, SurfaceId, SurfaceStore};
use crate::core::types::{Rectangle, Region, Transform};
use crate::output::{Output, OutputId};

/// One surface's contribution to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderElement {
    /// The surface being drawn.
    pub surface: SurfaceId,
    /// The committed buffer to sample from.
    pub buffer: Buffer,
    /// Where to draw it, in output-local physical pixels (the output's
    /// scale is already applied).
    pub dest: Rectangle,
    /// The transform to apply to the buffer while drawing.
    pub transform: Transform,
}

/// Everything a display backend needs to draw one frame on one output.
///
/// Elements are in draw order (back-to-front).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderList {
    /// The output this frame is for.
    pub output: Option<OutputId>,
    /// The surfaces to draw, back-to-front.
    pub elements: Vec<RenderElement>,
    /// The area that actually changed since the last presented frame, in
    /// global coordinates. Backends may redraw more, never less.
    pub damage: Region,
}

impl RenderList {
    /// Tests whether the frame draws nothing.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The surfaces appearing in this frame, in draw order.
    pub fn surfaces(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.elements.iter().map(|e| e.surface)
    }
}

/// Flattens one output's surface stack into a render list.
///
/// A surface contributes exactly when it is mapped on the output, marked
/// visible, and has a committed buffer; pending state never leaks into a
/// frame. Surfaces whose extent misses the output entirely are skipped.
pub fn compose(surfaces: &SurfaceStore, output: &Output) -> RenderList {
    let output_rect = output.rect();
    let mut elements = Vec::new();

    for sid in output.stack() {
        let Some(surface) = surfaces.get(*sid) else {
            continue;
        };
        if !surface.is_visible() {
            continue;
        }
        let Some(buffer) = surface.committed() else {
            continue;
        };

        let extent = surface.extent();
        if !extent.intersects(&output_rect) {
            continue;
        }

        // global -> output-local -> physical
        let local = extent.translate(-output.position().x, -output.position().y);
        elements.push(RenderElement {
            surface: *sid,
            buffer: *buffer,
            dest: local.scale(output.scale()),
            transform: surface.transform(),
        });
    }

    RenderList {
        output: Some(output.id()),
        elements,
        damage: output.pending_damage().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::client::ClientId;
    use crate::core::types::Point;
    use crate::output::{OutputManager, OutputMode};

    fn output_mgr(scale: f32) -> (OutputManager, OutputId) {
        let mut mgr = OutputManager::new();
        let id = mgr.attach("VIRT-1", OutputMode::new(1920, 1080, 60_000), scale, Point::zeroed());
        (mgr, id)
    }

    #[test]
    fn test_compose_uses_committed_not_pending() {
        let a = ClientId(1);
        let mut surfaces = SurfaceStore::new();
        let (mut outputs, out) = output_mgr(1.0);

        let s = surfaces.create(a);
        surfaces.attach_pending(s, a, Buffer::new(1, 64, 64), &[]).unwrap();
        surfaces.commit(s, a).unwrap();
        outputs.map_surface(out, s).unwrap();

        // stage a second buffer without committing
        surfaces.attach_pending(s, a, Buffer::new(2, 64, 64), &[]).unwrap();

        let list = compose(&surfaces, outputs.get(out).unwrap());
        assert_eq!(list.elements.len(), 1);
        assert_eq!(list.elements[0].buffer.handle, 1);
    }

    #[test]
    fn test_compose_preserves_stack_order() {
        let a = ClientId(1);
        let mut surfaces = SurfaceStore::new();
        let (mut outputs, out) = output_mgr(1.0);

        let s1 = surfaces.create(a);
        surfaces.attach_pending(s1, a, Buffer::new(1, 64, 64), &[]).unwrap();
        surfaces.commit(s1, a).unwrap();

        let s2 = surfaces.create(a);
        surfaces.attach_pending(s2, a, Buffer::new(2, 64, 64), &[]).unwrap();
        surfaces.commit(s2, a).unwrap();

        outputs.set_surface_order(out, vec![s2, s1]).unwrap();

        let list = compose(&surfaces, outputs.get(out).unwrap());
        let order: Vec<_> = list.surfaces().collect();
        assert_eq!(order, vec![s2, s1]);
    }

    #[test]
    fn test_compose_skips_hidden_and_uncommitted() {
        let a = ClientId(1);
        let mut surfaces = SurfaceStore::new();
        let (mut outputs, out) = output_mgr(1.0);

        let hidden = surfaces.create(a);
        surfaces.attach_pending(hidden, a, Buffer::new(1, 64, 64), &[]).unwrap();
        surfaces.commit(hidden, a).unwrap();
        surfaces.set_visible(hidden, false).unwrap();

        let bare = surfaces.create(a);

        outputs.map_surface(out, hidden).unwrap();
        outputs.map_surface(out, bare).unwrap();

        let list = compose(&surfaces, outputs.get(out).unwrap());
        assert!(list.is_empty());
    }

    #[test]
    fn test_compose_applies_output_scale_and_position() {
        let a = ClientId(1);
        let mut surfaces = SurfaceStore::new();
        let mut outputs = OutputManager::new();
        let out = outputs.attach(
            "VIRT-2",
            OutputMode::new(1920, 1080, 60_000),
            2.0,
            Point::new(1920, 0),
        );

        let s = surfaces.create(a);
        surfaces.set_position(s, Point::new(1930, 20)).unwrap();
        surfaces.attach_pending(s, a, Buffer::new(1, 100, 50), &[]).unwrap();
        surfaces.commit(s, a).unwrap();
        outputs.map_surface(out, s).unwrap();

        let list = compose(&surfaces, outputs.get(out).unwrap());
        // (1930, 20) global is (10, 20) on the output, doubled by scale
        assert_eq!(list.elements[0].dest, Rectangle::new(20, 40, 200, 100));
    }

    #[test]
    fn test_compose_is_deterministic() {
        let a = ClientId(1);
        let mut surfaces = SurfaceStore::new();
        let (mut outputs, out) = output_mgr(1.0);

        for n in 0..4 {
            let s = surfaces.create(a);
            surfaces.set_position(s, Point::new(n * 10, 0)).unwrap();
            surfaces.attach_pending(s, a, Buffer::new(n as u64, 64, 64), &[]).unwrap();
            surfaces.commit(s, a).unwrap();
            outputs.map_surface(out, s).unwrap();
        }

        let first = compose(&surfaces, outputs.get(out).unwrap());
        let second = compose(&surfaces, outputs.get(out).unwrap());
        assert_eq!(first, second);
    }
}
