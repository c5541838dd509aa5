//! Quadrant bookkeeping shared by the rendering and debug batchers.

use std::cmp::Ordering;

use glam::{IVec2, Vec2};
use rustc_hash::FxHashSet;

use crate::server::Rid;

/// Quadrant containing `coords`, flooring toward negative infinity so that
/// every quadrant covers exactly `size` x `size` cells.
pub fn quadrant_coords(coords: IVec2, size: i32) -> IVec2 {
    IVec2::new(coords.x.div_euclid(size), coords.y.div_euclid(size))
}

/// A group of cells drawn through a shared set of canvas items.
#[derive(Debug, Default)]
pub struct RenderingQuadrant {
    pub coords: IVec2,
    /// Anchor position of the canvas items in layer-local space.
    pub position: Vec2,
    pub cells: FxHashSet<IVec2>,
    pub canvas_items: Vec<Rid>,
}

impl RenderingQuadrant {
    pub fn new(coords: IVec2, position: Vec2) -> Self {
        Self {
            coords,
            position,
            ..Self::default()
        }
    }
}

/// Debug overlay quadrant: one canvas item for all its cells.
#[derive(Debug, Default)]
pub struct DebugQuadrant {
    pub coords: IVec2,
    pub cells: FxHashSet<IVec2>,
    pub canvas_item: Option<Rid>,
}

/// Insertion-ordered set of quadrants to rebuild.
#[derive(Debug, Default)]
pub struct DirtyQuadrants {
    list: Vec<IVec2>,
    set: FxHashSet<IVec2>,
}

impl DirtyQuadrants {
    pub fn mark(&mut self, coords: IVec2) {
        if self.set.insert(coords) {
            self.list.push(coords);
        }
    }

    pub fn take(&mut self) -> Vec<IVec2> {
        self.set.clear();
        std::mem::take(&mut self.list)
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

/// Global draw order of rendering quadrants: top to bottom, then right to
/// left. Coordinates break ties so distinct quadrants never compare equal.
pub fn draw_order(a: &RenderingQuadrant, b: &RenderingQuadrant) -> Ordering {
    a.position
        .y
        .total_cmp(&b.position.y)
        .then_with(|| b.position.x.total_cmp(&a.position.x))
        .then_with(|| (a.coords.y, a.coords.x).cmp(&(b.coords.y, b.coords.x)))
}
