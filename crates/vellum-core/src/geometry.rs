// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Provides sizes, points and rectangles for surface dimensions and draw bounds.
//!
//! Surface dimensions use signed integer components: a negative width and height is the
//! sentinel for a "fully lazy" surface whose size is unknown until instantiation.
//! Draw bounds use `f32` rectangles.

use approx::AbsDiffEq;

/// A two-dimensional integer size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ISize {
    /// The width component of the size.
    pub width: i32,
    /// The height component of the size.
    pub height: i32,
}

impl ISize {
    /// The sentinel used by fully lazy proxies.
    pub const LAZY: ISize = ISize {
        width: -1,
        height: -1,
    };

    /// Creates a new size.
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Returns `true` if either dimension is zero or negative.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Returns `true` if this is the fully-lazy sentinel (negative dimensions).
    pub fn is_lazy_sentinel(&self) -> bool {
        self.width < 0 && self.height < 0
    }

    /// Returns the number of pixels covered, or zero for empty sizes.
    pub fn area(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.width as u64 * self.height as u64
        }
    }
}

/// A two-dimensional integer point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IPoint {
    /// The x-coordinate.
    pub x: i32,
    /// The y-coordinate.
    pub y: i32,
}

impl IPoint {
    /// Creates a new point.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// An integer rectangle, half-open on the right and bottom edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IRect {
    /// The left edge.
    pub left: i32,
    /// The top edge.
    pub top: i32,
    /// The right edge (exclusive).
    pub right: i32,
    /// The bottom edge (exclusive).
    pub bottom: i32,
}

impl IRect {
    /// The empty rectangle.
    pub const EMPTY: IRect = IRect {
        left: 0,
        top: 0,
        right: 0,
        bottom: 0,
    };

    /// Creates a rectangle from its four edges.
    pub const fn from_ltrb(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Creates a rectangle anchored at the origin with the given size.
    pub const fn from_size(size: ISize) -> Self {
        Self::from_ltrb(0, 0, size.width, size.height)
    }

    /// Creates a rectangle from an origin point and a size.
    pub const fn from_point_size(origin: IPoint, size: ISize) -> Self {
        Self::from_ltrb(
            origin.x,
            origin.y,
            origin.x + size.width,
            origin.y + size.height,
        )
    }

    /// Returns the width of the rectangle.
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    /// Returns the height of the rectangle.
    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Returns the size of the rectangle.
    pub fn size(&self) -> ISize {
        ISize::new(self.width(), self.height())
    }

    /// Returns `true` if the rectangle encloses no area.
    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    /// Returns the intersection of two rectangles, or `None` if they do not intersect.
    pub fn intersect(&self, other: &IRect) -> Option<IRect> {
        let r = IRect::from_ltrb(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        (!r.is_empty()).then_some(r)
    }

    /// Grows this rectangle to include `other`. Empty rectangles are ignored.
    pub fn join(&mut self, other: &IRect) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = *other;
            return;
        }
        self.left = self.left.min(other.left);
        self.top = self.top.min(other.top);
        self.right = self.right.max(other.right);
        self.bottom = self.bottom.max(other.bottom);
    }

    /// Returns `true` if `other` lies entirely within this rectangle.
    pub fn contains(&self, other: &IRect) -> bool {
        !other.is_empty()
            && self.left <= other.left
            && self.top <= other.top
            && self.right >= other.right
            && self.bottom >= other.bottom
    }
}

/// A floating-point rectangle used for draw bounds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    /// The left edge.
    pub left: f32,
    /// The top edge.
    pub top: f32,
    /// The right edge.
    pub right: f32,
    /// The bottom edge.
    pub bottom: f32,
}

impl Rect {
    /// The empty rectangle.
    pub const EMPTY: Rect = Rect {
        left: 0.0,
        top: 0.0,
        right: 0.0,
        bottom: 0.0,
    };

    /// Creates a rectangle from its four edges.
    pub const fn from_ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Creates a rectangle from an origin and a size.
    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::from_ltrb(x, y, x + width, y + height)
    }

    /// Returns an inverted rectangle that acts as the identity for [`Rect::join`].
    pub const fn largest_inverted() -> Self {
        Self::from_ltrb(f32::MAX, f32::MAX, f32::MIN, f32::MIN)
    }

    /// Returns the width of the rectangle.
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    /// Returns the height of the rectangle.
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Returns `true` if the rectangle encloses no area.
    pub fn is_empty(&self) -> bool {
        // Written negated so that NaN edges count as empty.
        !(self.left < self.right && self.top < self.bottom)
    }

    /// Returns `true` if every edge is a finite number.
    pub fn is_finite(&self) -> bool {
        self.left.is_finite()
            && self.top.is_finite()
            && self.right.is_finite()
            && self.bottom.is_finite()
    }

    /// Grows this rectangle to include `other` without checking either for emptiness.
    ///
    /// Joining onto [`Rect::largest_inverted`] yields `other`.
    pub fn join_non_empty(&mut self, other: &Rect) {
        self.left = self.left.min(other.left);
        self.top = self.top.min(other.top);
        self.right = self.right.max(other.right);
        self.bottom = self.bottom.max(other.bottom);
    }

    /// Grows this rectangle to include `other`, ignoring `other` if it is empty.
    pub fn join(&mut self, other: &Rect) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = *other;
            return;
        }
        self.join_non_empty(other);
    }

    /// Returns the intersection of two rectangles, or `None` if they do not intersect.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::from_ltrb(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        (!r.is_empty()).then_some(r)
    }

    /// Returns `true` if the interiors of the two rectangles intersect.
    ///
    /// Rectangles that only share an edge do not overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.right > other.left
            && self.bottom > other.top
            && other.right > self.left
            && other.bottom > self.top
    }

    /// Returns `true` if the rectangles intersect or share an edge.
    pub fn touches_or_overlaps(&self, other: &Rect) -> bool {
        self.right >= other.left
            && self.bottom >= other.top
            && other.right >= self.left
            && other.bottom >= self.top
    }

    /// Returns the smallest integer rectangle containing this one.
    pub fn round_out(&self) -> IRect {
        IRect::from_ltrb(
            self.left.floor() as i32,
            self.top.floor() as i32,
            self.right.ceil() as i32,
            self.bottom.ceil() as i32,
        )
    }
}

impl From<IRect> for Rect {
    fn from(r: IRect) -> Self {
        Rect::from_ltrb(r.left as f32, r.top as f32, r.right as f32, r.bottom as f32)
    }
}

impl AbsDiffEq for Rect {
    type Epsilon = f32;

    fn default_epsilon() -> Self::Epsilon {
        f32::EPSILON
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.left.abs_diff_eq(&other.left, epsilon)
            && self.top.abs_diff_eq(&other.top, epsilon)
            && self.right.abs_diff_eq(&other.right, epsilon)
            && self.bottom.abs_diff_eq(&other.bottom, epsilon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn lazy_sentinel_is_detected() {
        assert!(ISize::LAZY.is_lazy_sentinel());
        assert!(ISize::LAZY.is_empty());
        assert!(!ISize::new(4, 4).is_lazy_sentinel());
        assert_eq!(ISize::new(4, 8).area(), 32);
        assert_eq!(ISize::LAZY.area(), 0);
    }

    #[test]
    fn edge_sharing_rects_do_not_overlap() {
        let a = Rect::from_ltrb(0.0, 0.0, 10.0, 10.0);
        let b = Rect::from_ltrb(10.0, 0.0, 20.0, 10.0);
        assert!(!a.overlaps(&b));
        assert!(a.touches_or_overlaps(&b));

        let c = Rect::from_ltrb(5.0, 5.0, 15.0, 15.0);
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn join_onto_inverted_yields_other() {
        let mut r = Rect::largest_inverted();
        let other = Rect::from_ltrb(1.0, 2.0, 3.0, 4.0);
        r.join_non_empty(&other);
        assert_abs_diff_eq!(r, other);
    }

    #[test]
    fn join_skips_empty_rects() {
        let mut r = Rect::from_ltrb(0.0, 0.0, 1.0, 1.0);
        r.join(&Rect::EMPTY);
        assert_abs_diff_eq!(r, Rect::from_ltrb(0.0, 0.0, 1.0, 1.0));
        r.join(&Rect::from_ltrb(2.0, 2.0, 3.0, 3.0));
        assert_abs_diff_eq!(r, Rect::from_ltrb(0.0, 0.0, 3.0, 3.0));
    }

    #[test]
    fn round_out_covers_fractional_edges() {
        let r = Rect::from_ltrb(0.5, 1.2, 9.1, 9.9);
        assert_eq!(r.round_out(), IRect::from_ltrb(0, 1, 10, 10));
    }

    #[test]
    fn irect_intersect_and_join() {
        let a = IRect::from_ltrb(0, 0, 10, 10);
        let b = IRect::from_ltrb(5, 5, 20, 20);
        assert_eq!(a.intersect(&b), Some(IRect::from_ltrb(5, 5, 10, 10)));
        assert_eq!(a.intersect(&IRect::from_ltrb(10, 0, 12, 5)), None);

        let mut j = IRect::EMPTY;
        j.join(&a);
        j.join(&b);
        assert_eq!(j, IRect::from_ltrb(0, 0, 20, 20));
        assert!(j.contains(&a));
    }
}
