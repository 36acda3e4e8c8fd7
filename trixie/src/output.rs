//! The output manager: physical/virtual displays, their modes, and which
//! surfaces are visible on each.
//!
//! An [`Output`] models one display sink with its own refresh cadence. It
//! holds *non-owning* back-references to the surfaces mapped onto it, as a
//! back-to-front stack of [`SurfaceId`]s: z-order within an output is a
//! total order, and no two surfaces may occupy the same index.
//!
//! Hotplug is asynchronous relative to frame scheduling: detaching an
//! output mid-frame drops that frame (the scheduler's concern) and either
//! reassigns the output's surfaces to a fallback output or leaves them
//! unmapped — never destroys them.

use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::core::surface::SurfaceId;
use crate::core::types::{Point, Rectangle, Region, Size};
use crate::{Result, TrixieError};

/// A unique identifier for an [`Output`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub(crate) u64);

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A display mode: resolution plus refresh rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode {
    /// The resolution of the mode.
    pub size: Size,
    /// The refresh rate, in millihertz (60 Hz = 60_000).
    pub refresh: u32,
}

impl OutputMode {
    /// Creates a new mode.
    pub const fn new(width: u32, height: u32, refresh: u32) -> OutputMode {
        OutputMode {
            size: Size::new(width, height),
            refresh,
        }
    }

    /// The refresh interval of this mode.
    ///
    /// A nonsensical refresh of zero is clamped to 1 Hz rather than
    /// dividing by it.
    pub fn interval(&self) -> Duration {
        let refresh = self.refresh.max(1000);
        Duration::from_secs_f64(1000.0 / refresh as f64)
    }
}

/// A physical or virtual display.
///
/// The `stack` is the authoritative mapping state: a surface is "mapped"
/// exactly when it appears in at least one output's stack, and its z-order
/// on that output is its stack index (back-to-front).
#[derive(Debug, Clone)]
pub struct Output {
    id: OutputId,
    /// The name of the output, usually formatted `<connector>-<number>`
    /// (e.g. "VIRT-1").
    name: String,
    mode: OutputMode,
    /// The scale factor applied when composing onto this output.
    scale: f32,
    /// The output's position in the global coordinate space.
    position: Point,
    /// Mapped surfaces in back-to-front order.
    stack: Vec<SurfaceId>,
    /// Damage accumulated since the last presented frame, in global
    /// coordinates, clipped to this output.
    pending_damage: Region,
}

impl Output {
    /// The output's id.
    #[inline(always)]
    pub fn id(&self) -> OutputId {
        self.id
    }

    /// The output's connector name.
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The output's current mode.
    #[inline(always)]
    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// The output's scale factor.
    #[inline(always)]
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// The output's position in the global space.
    #[inline(always)]
    pub fn position(&self) -> Point {
        self.position
    }

    /// The area the output covers in the global space.
    pub fn rect(&self) -> Rectangle {
        Rectangle::from_parts(self.position, self.mode.size)
    }

    /// The mapped surfaces in back-to-front order.
    #[inline(always)]
    pub fn stack(&self) -> &[SurfaceId] {
        &self.stack
    }

    /// Tests whether a surface is mapped on this output.
    pub fn is_mapped(&self, id: SurfaceId) -> bool {
        self.stack.contains(&id)
    }

    /// The damage accumulated since the last presented frame.
    #[inline(always)]
    pub fn pending_damage(&self) -> &Region {
        &self.pending_damage
    }

    /// Clears accumulated damage after a successful present.
    pub(crate) fn clear_damage(&mut self) {
        self.pending_damage.clear();
    }

    pub(crate) fn add_damage(&mut self, damage: &Region) {
        let clipped = damage.clipped_to(&self.rect());
        self.pending_damage.merge(&clipped);
    }
}

/// What happened to the surfaces of a detached output.
#[derive(Debug, Clone, Default)]
pub struct DetachReport {
    /// Surfaces reassigned to the fallback output, in their old z-order.
    pub reassigned: Vec<SurfaceId>,
    /// Surfaces left unmapped: excluded from composition until remapped.
    pub unmapped: Vec<SurfaceId>,
}

/// Tracks connected outputs and the surface stack on each.
#[derive(Debug, Default)]
pub struct OutputManager {
    outputs: IndexMap<OutputId, Output>,
    next_id: u64,
}

impl OutputManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self {
            outputs: IndexMap::new(),
            next_id: 0,
        }
    }

    /// The number of connected outputs.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Tests whether any outputs are connected.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Attaches a new output.
    pub fn attach<S: Into<String>>(
        &mut self,
        name: S,
        mode: OutputMode,
        scale: f32,
        position: Point,
    ) -> OutputId {
        let id = OutputId(self.next_id);
        self.next_id += 1;

        let name = name.into();
        info!("attached output {} ({}, {})", id, name, mode.size);

        self.outputs.insert(
            id,
            Output {
                id,
                name,
                mode,
                scale,
                position,
                stack: Vec::new(),
                pending_damage: Region::new(),
            },
        );
        id
    }

    /// Detaches an output.
    ///
    /// Surfaces that were mapped *only* to the detached output are
    /// reassigned to the first remaining output if `use_fallback` is set
    /// and one exists; otherwise they are left unmapped (never destroyed)
    /// and excluded from composition until remapped.
    pub fn detach(&mut self, id: OutputId, use_fallback: bool) -> Result<DetachReport> {
        let output = self
            .outputs
            .shift_remove(&id)
            .ok_or(TrixieError::UnknownOutput(id))?;

        let mut report = DetachReport::default();

        // surfaces still mapped elsewhere need no help
        let orphans: Vec<SurfaceId> = output
            .stack
            .iter()
            .copied()
            .filter(|sid| !self.outputs.values().any(|o| o.is_mapped(*sid)))
            .collect();

        let fallback = if use_fallback {
            self.outputs.keys().next().copied()
        } else {
            None
        };

        match fallback {
            Some(fb) => {
                let target = self.outputs.get_mut(&fb).expect("fallback output is live");
                // preserve the relative z-order of the reassigned group
                for sid in orphans {
                    target.stack.push(sid);
                    report.reassigned.push(sid);
                }
                info!(
                    "output {} detached, {} surfaces reassigned to {}",
                    id,
                    report.reassigned.len(),
                    fb
                );
            }
            None => {
                report.unmapped = orphans;
                if !report.unmapped.is_empty() {
                    warn!(
                        "output {} detached with no fallback, {} surfaces unmapped",
                        id,
                        report.unmapped.len()
                    );
                }
            }
        }

        Ok(report)
    }

    /// Returns a reference to an output, if connected.
    pub fn get(&self, id: OutputId) -> Option<&Output> {
        self.outputs.get(&id)
    }

    /// Returns a reference to an output, or `UnknownOutput`.
    pub fn output(&self, id: OutputId) -> Result<&Output> {
        self.outputs.get(&id).ok_or(TrixieError::UnknownOutput(id))
    }

    fn output_mut(&mut self, id: OutputId) -> Result<&mut Output> {
        self.outputs
            .get_mut(&id)
            .ok_or(TrixieError::UnknownOutput(id))
    }

    /// The ids of all connected outputs, in attach order.
    pub fn ids(&self) -> Vec<OutputId> {
        self.outputs.keys().copied().collect()
    }

    /// Iterates over connected outputs in attach order.
    pub fn iter(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    /// Replaces an output's surface stack with an explicit back-to-front
    /// order.
    ///
    /// The list must be duplicate-free: z-order within an output is a
    /// total order and no two surfaces may occupy the same index.
    pub fn set_surface_order(&mut self, id: OutputId, stack: Vec<SurfaceId>) -> Result<()> {
        for (i, sid) in stack.iter().enumerate() {
            if stack[..i].contains(sid) {
                return Err(TrixieError::InvalidStack(
                    id,
                    format!("surface {sid} appears twice"),
                ));
            }
        }
        self.output_mut(id)?.stack = stack;
        Ok(())
    }

    /// Maps a surface onto the top of an output's stack.
    ///
    /// Is a no-op if the surface is already mapped there.
    pub fn map_surface(&mut self, id: OutputId, sid: SurfaceId) -> Result<()> {
        let output = self.output_mut(id)?;
        if !output.is_mapped(sid) {
            output.stack.push(sid);
            debug!("mapped surface {} onto output {}", sid, id);
        }
        Ok(())
    }

    /// Unmaps a surface from one output.
    pub fn unmap_surface(&mut self, id: OutputId, sid: SurfaceId) -> Result<()> {
        self.output_mut(id)?.stack.retain(|s| *s != sid);
        Ok(())
    }

    /// Removes a surface from every output's stack.
    ///
    /// This is the atomic back-reference cleanup run before a surface is
    /// destroyed, so composition can never observe a stale id.
    pub fn remove_surface(&mut self, sid: SurfaceId) {
        for output in self.outputs.values_mut() {
            output.stack.retain(|s| *s != sid);
        }
    }

    /// The outputs a surface is currently mapped on, in attach order.
    pub fn outputs_showing(&self, sid: SurfaceId) -> Vec<OutputId> {
        self.outputs
            .values()
            .filter(|o| o.is_mapped(sid))
            .map(|o| o.id)
            .collect()
    }

    /// Accumulates committed damage onto every output showing the surface.
    pub fn accumulate_damage(&mut self, sid: SurfaceId, damage: &Region) {
        for output in self.outputs.values_mut() {
            if output.is_mapped(sid) {
                output.add_damage(damage);
            }
        }
    }

    /// Adds damage to one specific output's repaint region.
    pub(crate) fn add_output_damage(&mut self, id: OutputId, damage: &Region) {
        if let Some(output) = self.outputs.get_mut(&id) {
            output.add_damage(damage);
        }
    }

    /// Clears an output's repaint region once a frame covering it has
    /// been handed to the backend.
    pub(crate) fn clear_damage(&mut self, id: OutputId) {
        if let Some(output) = self.outputs.get_mut(&id) {
            output.clear_damage();
        }
    }

    /// The first output whose area contains `pt`, in attach order.
    pub fn output_at(&self, pt: Point) -> Option<&Output> {
        self.outputs.values().find(|o| o.rect().contains(pt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(n: u64) -> SurfaceId {
        SurfaceId(n)
    }

    fn mgr_with_output() -> (OutputManager, OutputId) {
        let mut mgr = OutputManager::new();
        let id = mgr.attach("VIRT-1", OutputMode::new(1920, 1080, 60_000), 1.0, Point::zeroed());
        (mgr, id)
    }

    #[test]
    fn test_mode_interval() {
        let mode = OutputMode::new(1920, 1080, 60_000);
        let ms = mode.interval().as_secs_f64() * 1000.0;
        assert!((ms - 16.666).abs() < 0.1);
    }

    #[test]
    fn test_set_surface_order_rejects_duplicates() {
        let (mut mgr, id) = mgr_with_output();

        let err = mgr
            .set_surface_order(id, vec![sid(1), sid(2), sid(1)])
            .unwrap_err();
        assert!(matches!(err, TrixieError::InvalidStack(o, _) if o == id));

        mgr.set_surface_order(id, vec![sid(1), sid(2)]).unwrap();
        assert_eq!(mgr.get(id).unwrap().stack(), &[sid(1), sid(2)]);
    }

    #[test]
    fn test_detach_reassigns_to_fallback() {
        let (mut mgr, first) = mgr_with_output();
        let second = mgr.attach(
            "VIRT-2",
            OutputMode::new(1280, 720, 60_000),
            1.0,
            Point::new(1920, 0),
        );

        mgr.map_surface(second, sid(1)).unwrap();
        mgr.map_surface(second, sid(2)).unwrap();

        let report = mgr.detach(second, true).unwrap();

        assert_eq!(report.reassigned, vec![sid(1), sid(2)]);
        assert!(report.unmapped.is_empty());
        assert_eq!(mgr.get(first).unwrap().stack(), &[sid(1), sid(2)]);
    }

    #[test]
    fn test_detach_without_fallback_unmaps() {
        let (mut mgr, id) = mgr_with_output();
        mgr.map_surface(id, sid(1)).unwrap();

        let report = mgr.detach(id, true).unwrap();

        // no other output exists, so the surface is merely unmapped
        assert_eq!(report.unmapped, vec![sid(1)]);
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_detach_leaves_multihomed_surfaces_alone() {
        let (mut mgr, first) = mgr_with_output();
        let second = mgr.attach(
            "VIRT-2",
            OutputMode::new(1280, 720, 60_000),
            1.0,
            Point::new(1920, 0),
        );

        mgr.map_surface(first, sid(1)).unwrap();
        mgr.map_surface(second, sid(1)).unwrap();

        let report = mgr.detach(second, true).unwrap();

        assert!(report.reassigned.is_empty());
        assert!(report.unmapped.is_empty());
        assert_eq!(mgr.get(first).unwrap().stack(), &[sid(1)]);
    }

    #[test]
    fn test_remove_surface_everywhere() {
        let (mut mgr, first) = mgr_with_output();
        let second = mgr.attach(
            "VIRT-2",
            OutputMode::new(1280, 720, 60_000),
            1.0,
            Point::new(1920, 0),
        );

        mgr.map_surface(first, sid(1)).unwrap();
        mgr.map_surface(second, sid(1)).unwrap();
        mgr.map_surface(second, sid(2)).unwrap();

        mgr.remove_surface(sid(1));

        assert!(mgr.outputs_showing(sid(1)).is_empty());
        assert_eq!(mgr.get(second).unwrap().stack(), &[sid(2)]);
    }

    #[test]
    fn test_damage_clipped_to_output() {
        let (mut mgr, id) = mgr_with_output();
        mgr.map_surface(id, sid(1)).unwrap();

        let mut damage = Region::new();
        damage.add(Rectangle::new(1900, 0, 100, 50));

        mgr.accumulate_damage(sid(1), &damage);

        let pending = mgr.get(id).unwrap().pending_damage();
        assert_eq!(pending.rects(), &[Rectangle::new(1900, 0, 20, 50)]);
    }
}
