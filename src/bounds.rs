//! Bounding volume types used to build and query the tree.

use glam::{Mat3, Vec3};

/// An axis-aligned bounding box.
///
/// A box with `min > max` on any axis is _empty_. Empty boxes can be inserted into a tree; they
/// are stored as sentinel slots and never match a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    /// The empty box. Growing it by any non-empty box yields that box.
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(-f32::MAX),
    };

    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn from_point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    /// The smallest box containing all three vertices of a triangle.
    #[inline]
    pub fn from_triangle(v0: Vec3, v1: Vec3, v2: Vec3) -> Self {
        Self {
            min: v0.min(v1).min(v2),
            max: v0.max(v1).max(v2),
        }
    }

    /// Returns `true` if `min > max` on any axis.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Grow this box to include `other`. Empty boxes are ignored.
    #[inline]
    pub fn include(&mut self, other: &Aabb) {
        if other.is_empty() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn dimensions(&self) -> Vec3 {
        self.max - self.min
    }

    /// Closed-interval overlap test. Touching boxes intersect.
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    /// Returns `true` if `other` lies entirely inside this box.
    #[inline]
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.cmple(other.min).all() && other.max.cmple(self.max).all()
    }

    /// Index of the axis with the greatest extent. Ties prefer x, then y.
    #[inline]
    pub(crate) fn longest_axis(&self) -> usize {
        let d = self.dimensions();
        if d.x >= d.y && d.x >= d.z {
            0
        } else if d.y >= d.z {
            1
        } else {
            2
        }
    }
}

/// An oriented bounding box.
///
/// The columns of `rot` are the box axes in world space; `extents` holds the half-size along each
/// of them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obb {
    pub center: Vec3,
    pub extents: Vec3,
    pub rot: Mat3,
}

impl Obb {
    #[inline]
    pub fn new(center: Vec3, extents: Vec3, rot: Mat3) -> Self {
        Self {
            center,
            extents,
            rot,
        }
    }

    /// An oriented box aligned with the world axes.
    #[inline]
    pub fn from_aabb(aabb: &Aabb) -> Self {
        Self {
            center: aabb.center(),
            extents: aabb.dimensions() * 0.5,
            rot: Mat3::IDENTITY,
        }
    }

    /// The world-space axis-aligned box enclosing this oriented box.
    pub fn bounding_aabb(&self) -> Aabb {
        let r = self.rot.x_axis.abs() * self.extents.x
            + self.rot.y_axis.abs() * self.extents.y
            + self.rot.z_axis.abs() * self.extents.z;
        Aabb::new(self.center - r, self.center + r)
    }
}

/// A ray or a finite segment, optionally swept by an inflation of the tested boxes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Direction of the ray. Need not be normalized. For segments this is `end - start`, and
    /// hits are limited to parametric `t` in `[0, 1]`.
    pub dir: Vec3,
    /// Per-axis amount every tested box is grown by, e.g. the radius of a swept sphere.
    pub inflation: Option<Vec3>,
    pub segment: bool,
}

impl Ray {
    /// An unbounded ray starting at `origin`.
    pub fn new(origin: Vec3, dir: Vec3) -> Self {
        Self {
            origin,
            dir,
            inflation: None,
            segment: false,
        }
    }

    /// The segment from `start` to `end`.
    pub fn segment(start: Vec3, end: Vec3) -> Self {
        Self {
            origin: start,
            dir: end - start,
            inflation: None,
            segment: true,
        }
    }

    /// Grow every tested box by `inflation` on each side.
    pub fn inflated(mut self, inflation: Vec3) -> Self {
        self.inflation = Some(inflation);
        self
    }

    /// Sweep a sphere of `radius` along the ray.
    pub fn with_radius(self, radius: f32) -> Self {
        self.inflated(Vec3::splat(radius))
    }
}
