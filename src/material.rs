use glam::Vec3;

use crate::theme::Theme;
use crate::uniforms::MaterialUniform;

pub const LUMINANCE_THRESHOLD: f32 = 0.3;
pub const DARK_BOOST: f32 = 2.0;
pub const BRIGHT_BOOST: f32 = 1.1;
pub const DARK_THEME_SCALE: f32 = 0.9;
pub const EMISSIVE_CAP: f32 = 0.1;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MaterialParams {
    pub base_color: Vec3,
    pub alpha: f32,
    pub metalness: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub emissive_intensity: f32,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            base_color: Vec3::splat(0.8),
            alpha: 1.0,
            metalness: 0.0,
            roughness: 0.5,
            emissive: Vec3::ZERO,
            emissive_intensity: 0.0,
        }
    }
}

/// Rec. 709 relative luminance.
pub fn luminance(color: Vec3) -> f32 {
    0.2126 * color.x + 0.7152 * color.y + 0.0722 * color.z
}

/// Recolors an original base color for the given theme.
pub fn themed_color(original: Vec3, theme: Theme) -> Vec3 {
    let factor = match theme {
        Theme::Light if luminance(original) < LUMINANCE_THRESHOLD => DARK_BOOST,
        Theme::Light => BRIGHT_BOOST,
        Theme::Dark => DARK_THEME_SCALE,
    };
    (original * factor).min(Vec3::ONE)
}

fn surface_for(theme: Theme) -> (f32, f32) {
    match theme {
        Theme::Light => (0.1, 0.5),
        Theme::Dark => (0.3, 0.6),
    }
}

/// A material plus the parameters it had when first seen, so that
/// recoloring never compounds across theme toggles.
#[derive(Clone, Debug)]
pub struct ThemedMaterial {
    pub name: Option<String>,
    original: MaterialParams,
    current: MaterialParams,
    has_texture: bool,
}

impl ThemedMaterial {
    pub fn new(name: Option<String>, params: MaterialParams, has_texture: bool) -> Self {
        Self { name, original: params, current: params, has_texture }
    }

    pub fn original(&self) -> &MaterialParams {
        &self.original
    }

    pub fn current(&self) -> &MaterialParams {
        &self.current
    }

    pub fn has_texture(&self) -> bool {
        self.has_texture
    }

    pub fn set_has_texture(&mut self, has_texture: bool) {
        self.has_texture = has_texture;
    }

    pub fn apply_theme(&mut self, theme: Theme) {
        let (metalness, roughness) = surface_for(theme);
        let mut next = self.original;
        next.base_color = themed_color(self.original.base_color, theme);
        next.metalness = metalness;
        next.roughness = roughness;
        next.emissive_intensity = self.original.emissive_intensity.min(EMISSIVE_CAP);
        self.current = next;
    }

    pub fn to_uniform(&self) -> MaterialUniform {
        let p = &self.current;
        MaterialUniform {
            base_color: [p.base_color.x, p.base_color.y, p.base_color.z, p.alpha],
            emissive: [p.emissive.x, p.emissive.y, p.emissive.z, p.emissive_intensity],
            params: [p.metalness, p.roughness, if self.has_texture { 1.0 } else { 0.0 }, 0.0],
        }
    }
}
