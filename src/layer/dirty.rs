//! Change tracking between update passes.

use glam::IVec2;
use rustc_hash::FxHashSet;

/// Layer-wide property changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DirtyFlag {
    Enabled,
    InTree,
    InCanvas,
    LocalTransform,
    Visibility,
    SelfModulate,
    YSortEnabled,
    YSortOrigin,
    ZIndex,
    LightMask,
    TextureFilter,
    TextureRepeat,
    RenderingQuadrantSize,
    UseKinematicBodies,
    NavigationEnabled,
    IndexInGroup,
    SelectedLayers,
    HighlightSelected,
    TileSet,
    RuntimeUpdate,
    CollisionVisibility,
    NavigationVisibility,
}

impl DirtyFlag {
    pub const ALL: [DirtyFlag; 22] = [
        DirtyFlag::Enabled,
        DirtyFlag::InTree,
        DirtyFlag::InCanvas,
        DirtyFlag::LocalTransform,
        DirtyFlag::Visibility,
        DirtyFlag::SelfModulate,
        DirtyFlag::YSortEnabled,
        DirtyFlag::YSortOrigin,
        DirtyFlag::ZIndex,
        DirtyFlag::LightMask,
        DirtyFlag::TextureFilter,
        DirtyFlag::TextureRepeat,
        DirtyFlag::RenderingQuadrantSize,
        DirtyFlag::UseKinematicBodies,
        DirtyFlag::NavigationEnabled,
        DirtyFlag::IndexInGroup,
        DirtyFlag::SelectedLayers,
        DirtyFlag::HighlightSelected,
        DirtyFlag::TileSet,
        DirtyFlag::RuntimeUpdate,
        DirtyFlag::CollisionVisibility,
        DirtyFlag::NavigationVisibility,
    ];

    fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

/// Dirty flags plus the deduplicated, insertion-ordered list of edited cells.
#[derive(Debug, Default)]
pub struct DirtyState {
    flags: u32,
    cells: Vec<IVec2>,
    cell_set: FxHashSet<IVec2>,
}

impl DirtyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, flag: DirtyFlag) {
        self.flags |= flag.bit();
    }

    /// Mark every flag, as when a layer is first set up.
    pub fn mark_all(&mut self) {
        for flag in DirtyFlag::ALL {
            self.mark(flag);
        }
    }

    pub fn is_set(&self, flag: DirtyFlag) -> bool {
        self.flags & flag.bit() != 0
    }

    pub fn any_of(&self, flags: &[DirtyFlag]) -> bool {
        flags.iter().any(|f| self.is_set(*f))
    }

    pub fn any_flag(&self) -> bool {
        self.flags != 0
    }

    /// Add a cell to the dirty list. Returns `false` if it was already there.
    pub fn mark_cell(&mut self, coords: IVec2) -> bool {
        if self.cell_set.insert(coords) {
            self.cells.push(coords);
            true
        } else {
            false
        }
    }

    pub fn is_cell_dirty(&self, coords: IVec2) -> bool {
        self.cell_set.contains(&coords)
    }

    /// Dirty cells in the order they were first marked.
    pub fn cells(&self) -> &[IVec2] {
        &self.cells
    }

    pub fn clear_flags(&mut self) {
        self.flags = 0;
    }

    pub fn clear_cells(&mut self) {
        self.cells.clear();
        self.cell_set.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cells_are_deduplicated_in_order() {
        let mut dirty = DirtyState::new();
        assert!(dirty.mark_cell(IVec2::new(1, 1)));
        assert!(dirty.mark_cell(IVec2::new(0, 0)));
        assert!(!dirty.mark_cell(IVec2::new(1, 1)));
        assert_eq!(dirty.cells(), &[IVec2::new(1, 1), IVec2::new(0, 0)]);

        dirty.clear_cells();
        assert!(dirty.cells().is_empty());
        assert!(!dirty.is_cell_dirty(IVec2::new(0, 0)));
    }

    #[test]
    fn test_flags() {
        let mut dirty = DirtyState::new();
        assert!(!dirty.any_flag());
        dirty.mark(DirtyFlag::TileSet);
        assert!(dirty.is_set(DirtyFlag::TileSet));
        assert!(dirty.any_of(&[DirtyFlag::InTree, DirtyFlag::TileSet]));
        assert!(!dirty.is_set(DirtyFlag::InTree));

        dirty.mark_all();
        assert!(DirtyFlag::ALL.iter().all(|f| dirty.is_set(*f)));
        dirty.clear_flags();
        assert!(!dirty.any_flag());
    }
}
