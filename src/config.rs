//! Layer-wide configuration.
//!
//! These settings belong to the node that owns the layer in a full engine
//! (rendering quadrant size, light mask, debug visibility...). They are kept in
//! one serde-friendly struct so a whole layer setup can be loaded from JSON.

use serde::{Deserialize, Serialize};

/// Default edge length (in cells) of a rendering quadrant.
pub const DEFAULT_RENDERING_QUADRANT_SIZE: i32 = 16;

/// RGBA color with linear float components.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Darken the color by `amount` (0.0 = unchanged, 1.0 = black). Alpha is kept.
    pub fn darkened(&self, amount: f32) -> Self {
        Self {
            r: self.r * (1.0 - amount),
            g: self.g * (1.0 - amount),
            b: self.b * (1.0 - amount),
            a: self.a,
        }
    }

    /// Build a color from hue/saturation/value in 0..1.
    pub fn from_hsv(h: f32, s: f32, v: f32, a: f32) -> Self {
        let h = (h.rem_euclid(1.0)) * 6.0;
        let i = h.floor();
        let f = h - i;
        let p = v * (1.0 - s);
        let q = v * (1.0 - s * f);
        let t = v * (1.0 - s * (1.0 - f));
        let (r, g, b) = match i as i32 {
            0 => (v, t, p),
            1 => (q, v, p),
            2 => (p, v, t),
            3 => (p, q, v),
            4 => (t, p, v),
            _ => (v, p, q),
        };
        Self { r, g, b, a }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

/// Default texture filter applied to the layer's draw handles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextureFilter {
    #[default]
    Inherit,
    Nearest,
    Linear,
    NearestWithMipmaps,
    LinearWithMipmaps,
}

/// Default texture repeat mode applied to the layer's draw handles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextureRepeat {
    #[default]
    Inherit,
    Disabled,
    Enabled,
    Mirror,
}

/// Visibility of a debug overlay category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisibilityMode {
    /// Follow the debug hints (shown at runtime when the hint is on).
    #[default]
    Default,
    ForceHide,
    ForceShow,
}

/// Configuration parameters shared by every pass of a layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    /// Edge length in cells of a rendering quadrant (non y-sorted layers).
    pub rendering_quadrant_size: i32,

    /// Light mask pushed to every draw handle.
    pub light_mask: u32,

    /// Texture filter pushed to every draw handle.
    pub texture_filter: TextureFilter,

    /// Texture repeat pushed to every draw handle.
    pub texture_repeat: TextureRepeat,

    /// Object id attached to physics bodies and navigation regions.
    pub instance_id: u64,

    /// Collision shape overlay visibility.
    pub collision_visibility: VisibilityMode,

    /// Navigation polygon overlay visibility.
    pub navigation_visibility: VisibilityMode,

    /// Running inside an editor (enables placeholders in the debug overlay).
    pub editor_hint: bool,

    /// Runtime "visible collision shapes" debug hint.
    pub debug_collisions_hint: bool,

    /// Runtime "visible navigation" debug hint.
    pub debug_navigation_hint: bool,

    /// Seed of the RNG used to pick random tiles when painting terrains.
    pub terrain_seed: u64,
}

impl LayerConfig {
    pub fn show_collision(&self) -> bool {
        match self.collision_visibility {
            VisibilityMode::Default => !self.editor_hint && self.debug_collisions_hint,
            VisibilityMode::ForceHide => false,
            VisibilityMode::ForceShow => true,
        }
    }

    pub fn show_navigation(&self) -> bool {
        match self.navigation_visibility {
            VisibilityMode::Default => !self.editor_hint && self.debug_navigation_hint,
            VisibilityMode::ForceHide => false,
            VisibilityMode::ForceShow => true,
        }
    }
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            rendering_quadrant_size: DEFAULT_RENDERING_QUADRANT_SIZE,
            light_mask: 1,
            texture_filter: TextureFilter::Inherit,
            texture_repeat: TextureRepeat::Inherit,
            instance_id: 0,
            collision_visibility: VisibilityMode::Default,
            navigation_visibility: VisibilityMode::Default,
            editor_hint: false,
            debug_collisions_hint: false,
            debug_navigation_hint: false,
            terrain_seed: 0,
        }
    }
}
