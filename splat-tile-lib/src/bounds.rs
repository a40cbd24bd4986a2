use crate::common::SPLAT_EXTENT_SIGMAS;
use crate::error::TileError;
use crate::structures::{PointSource, Schema};
use glam::Vec3A;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3A,
    pub max: Vec3A,
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: Vec3A::splat(f32::INFINITY),
            max: Vec3A::splat(f32::NEG_INFINITY),
        }
    }

    pub fn from_center_half_extents(center: Vec3A, half_extents: Vec3A) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn extend(&self, other: &Aabb) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn add_point(&self, point: Vec3A) -> Self {
        self.extend(&Aabb {
            min: point,
            max: point,
        })
    }

    // halved first so finite boxes near f32::MAX stay finite
    pub fn center(&self) -> Vec3A {
        self.min * 0.5 + self.max * 0.5
    }

    pub fn half_extents(&self) -> Vec3A {
        self.max * 0.5 - self.min * 0.5
    }

    // inclusive
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }
}

/// How a splat contributes to the box of the node holding it.
///
/// The same policy drives split centers and the bounds reported on tiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BoundsPolicy {
    /// Raw `x, y, z` only.
    #[default]
    Tight,
    /// `position ± 2·exp(max(scale_0, scale_1, scale_2))`, covering the splat footprint.
    SplatInflated,
}

impl BoundsPolicy {
    pub fn check(&self, schema: &Schema) -> Result<(), TileError> {
        if *self == BoundsPolicy::SplatInflated && schema.scale_indices().is_none() {
            return Err(TileError::SchemaMismatch(
                "splat-inflated bounds need scale_0, scale_1 and scale_2".to_string(),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn point_bounds<P: PointSource>(&self, points: &P, point: usize) -> Aabb {
        let center = points.position(point);
        let radius = match (self, points.max_log_scale(point)) {
            (BoundsPolicy::SplatInflated, Some(log_scale)) => log_scale.exp() * SPLAT_EXTENT_SIGMAS,
            _ => 0.0,
        };
        Aabb::from_center_half_extents(center, Vec3A::splat(radius))
    }

    pub fn node_bounds<P: PointSource>(&self, points: &P, indices: &[usize]) -> Aabb {
        indices
            .iter()
            .fold(Aabb::empty(), |a, &i| a.extend(&self.point_bounds(points, i)))
    }
}
