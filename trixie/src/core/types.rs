//! Basic geometry types used throughout this crate at a high level.
//!
//! All coordinates are in one logical, compositor-global space, with the
//! (0, 0) reference taken from the top left corner of the 2D plane.
//! Per-output physical coordinates only exist inside a
//! [`RenderList`](crate::scene::RenderList), where the scene composer has
//! already applied the output's scale.

use std::fmt;

/// A type for representing a point on a display or screen.
///
/// # Example
///
/// ```rust
/// use trixie::types::Point;
///
/// let point = Point::new(0, 0);
///
/// assert_eq!(point, Point { x: 0, y: 0 });
/// ```
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    /// Creates a new Point.
    pub const fn new(x: i32, y: i32) -> Point {
        Point { x, y }
    }

    /// Creates a new Point where both coordinates are zero.
    pub const fn zeroed() -> Point {
        Point { x: 0, y: 0 }
    }

    /// Calculates the x and y offsets between itself and another Point.
    ///
    /// Offset is calculated with reference to itself.
    pub fn calculate_offset(&self, other: Point) -> (i32, i32) {
        (other.x - self.x, other.y - self.y)
    }

    /// Creates a Point offset by `(dx, dy)`.
    pub fn offset(&self, dx: i32, dy: i32) -> Point {
        Point {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// Scales the Point by a scale factor with respect to the
    /// origin (0, 0) at the top left of the coordinate space.
    pub fn scale(&self, factor: f32) -> Point {
        Point {
            x: ((self.x as f32) * factor).round() as i32,
            y: ((self.y as f32) * factor).round() as i32,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A 2D extent in pixels.
///
/// Both dimensions are unsigned; an extent with a zero dimension is
/// considered empty.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    /// Creates a new Size.
    pub const fn new(width: u32, height: u32) -> Size {
        Size { width, height }
    }

    /// Tests whether either dimension is zero.
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Scales the Size by a scale factor, rounding to the nearest pixel.
    pub fn scale(&self, factor: f32) -> Size {
        Size {
            width: ((self.width as f32) * factor).round() as u32,
            height: ((self.height as f32) * factor).round() as u32,
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A type for representing a 2D rectangular space on a display or screen.
///
/// A Rectangle is anchored at its top left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rectangle {
    /// The top left corner of the rectangle.
    pub point: Point,
    /// The extent of the rectangle.
    pub size: Size,
}

impl Rectangle {
    /// Creates a new Rectangle from raw coordinates.
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Rectangle {
        Rectangle {
            point: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    /// Creates a Rectangle from a corner point and a size.
    pub const fn from_parts(point: Point, size: Size) -> Rectangle {
        Rectangle { point, size }
    }

    /// Creates a zero-sized Rectangle at the origin.
    pub const fn zeroed() -> Rectangle {
        Rectangle {
            point: Point::zeroed(),
            size: Size::new(0, 0),
        }
    }

    /// Tests whether the Rectangle covers no area.
    pub const fn is_empty(&self) -> bool {
        self.size.is_empty()
    }

    /// The x coordinate one past the right edge.
    pub const fn right(&self) -> i32 {
        self.point.x + self.size.width as i32
    }

    /// The y coordinate one past the bottom edge.
    pub const fn bottom(&self) -> i32 {
        self.point.y + self.size.height as i32
    }

    /// Tests whether a Point falls within the Rectangle.
    ///
    /// The top and left edges are inclusive, the bottom and right
    /// edges exclusive.
    pub fn contains(&self, pt: Point) -> bool {
        pt.x >= self.point.x && pt.x < self.right() && pt.y >= self.point.y && pt.y < self.bottom()
    }

    /// Tests whether two Rectangles overlap.
    pub fn intersects(&self, other: &Rectangle) -> bool {
        self.point.x < other.right()
            && other.point.x < self.right()
            && self.point.y < other.bottom()
            && other.point.y < self.bottom()
    }

    /// Returns the overlapping area of two Rectangles, if any.
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        if !self.intersects(other) {
            return None;
        }

        let x = self.point.x.max(other.point.x);
        let y = self.point.y.max(other.point.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        Some(Rectangle::new(
            x,
            y,
            (right - x) as u32,
            (bottom - y) as u32,
        ))
    }

    /// Clips the Rectangle to the bounds of another, returning an
    /// empty Rectangle if they do not overlap.
    pub fn clipped_to(&self, bounds: &Rectangle) -> Rectangle {
        self.intersection(bounds).unwrap_or_else(Rectangle::zeroed)
    }

    /// Returns the Rectangle translated by `(dx, dy)`.
    pub fn translate(&self, dx: i32, dy: i32) -> Rectangle {
        Rectangle {
            point: self.point.offset(dx, dy),
            size: self.size,
        }
    }

    /// Scales the Rectangle by a scale factor with respect to the origin.
    pub fn scale(&self, factor: f32) -> Rectangle {
        Rectangle {
            point: self.point.scale(factor),
            size: self.size.scale(factor),
        }
    }
}

impl fmt::Display for Rectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.size, self.point)
    }
}

/// A set of sub-rectangles of a surface changed since the last composite,
/// used to minimise redraw work.
///
/// A Region makes no effort to keep its rectangles disjoint; it only
/// drops rectangles that are fully covered by an existing one. Redrawing
/// a damaged area twice is correct, forgetting one is not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Rectangle>,
}

impl Region {
    /// Creates a new, empty Region.
    pub const fn new() -> Region {
        Region { rects: Vec::new() }
    }

    /// Creates a Region covering a single Rectangle.
    pub fn from_rect(rect: Rectangle) -> Region {
        let mut region = Region::new();
        region.add(rect);
        region
    }

    /// Tests whether the Region covers no area.
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// The rectangles making up the Region.
    pub fn rects(&self) -> &[Rectangle] {
        &self.rects
    }

    /// Adds a Rectangle to the Region.
    ///
    /// Empty rectangles and rectangles already fully covered by a single
    /// existing rectangle are dropped.
    pub fn add(&mut self, rect: Rectangle) {
        if rect.is_empty() {
            return;
        }
        if self.rects.iter().any(|r| covers(r, &rect)) {
            return;
        }
        // drop any existing rects the new one swallows
        self.rects.retain(|r| !covers(&rect, r));
        self.rects.push(rect);
    }

    /// Merges another Region into this one.
    pub fn merge(&mut self, other: &Region) {
        for rect in &other.rects {
            self.add(*rect);
        }
    }

    /// Returns the Region with every rectangle clipped to `bounds`,
    /// dropping rectangles that fall entirely outside.
    pub fn clipped_to(&self, bounds: &Rectangle) -> Region {
        let mut clipped = Region::new();
        for rect in &self.rects {
            clipped.add(rect.clipped_to(bounds));
        }
        clipped
    }

    /// Returns the Region with every rectangle translated by `(dx, dy)`.
    pub fn translate(&self, dx: i32, dy: i32) -> Region {
        Region {
            rects: self.rects.iter().map(|r| r.translate(dx, dy)).collect(),
        }
    }

    /// Clears the Region.
    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Takes the current contents out of the Region, leaving it empty.
    pub fn take(&mut self) -> Region {
        Region {
            rects: std::mem::take(&mut self.rects),
        }
    }
}

/// Tests whether `outer` fully covers `inner`.
fn covers(outer: &Rectangle, inner: &Rectangle) -> bool {
    inner.point.x >= outer.point.x
        && inner.point.y >= outer.point.y
        && inner.right() <= outer.right()
        && inner.bottom() <= outer.bottom()
}

/// The rotation/reflection applied to a surface's buffer before
/// composition.
///
/// Only rotations are modelled; reflected variants have no counterpart
/// in the session policies this core implements.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transform {
    #[default]
    Normal,
    Rotated90,
    Rotated180,
    Rotated270,
}
