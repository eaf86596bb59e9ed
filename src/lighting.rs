//! Theme-dependent lighting rig.
//!
//! The rig is never edited light by light: a theme change clears it and
//! builds the full set for the new theme.

use glam::{vec3, Vec3};

use crate::theme::Theme;
use crate::uniforms::{LightUniform, MAX_LIGHTS};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LightRole {
    Ambient,
    Primary,
    Fill,
    Back,
    SubtleFill,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LightKind {
    Ambient,
    /// Light travelling from `position` toward the origin.
    Directional { position: Vec3 },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Light {
    pub role: LightRole,
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
}

impl Light {
    fn ambient(color: Vec3, intensity: f32) -> Self {
        Self { role: LightRole::Ambient, kind: LightKind::Ambient, color, intensity }
    }

    fn directional(role: LightRole, position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self { role, kind: LightKind::Directional { position }, color, intensity }
    }

    pub fn to_uniform(&self) -> LightUniform {
        let (direction, w) = match self.kind {
            LightKind::Ambient => (Vec3::ZERO, 0.0),
            LightKind::Directional { position } => ((-position).normalize_or_zero(), 1.0),
        };
        LightUniform {
            direction: [direction.x, direction.y, direction.z, w],
            color: [self.color.x, self.color.y, self.color.z, self.intensity],
        }
    }
}

fn rgb(hex: u32) -> Vec3 {
    vec3(
        ((hex >> 16) & 0xff) as f32 / 255.0,
        ((hex >> 8) & 0xff) as f32 / 255.0,
        (hex & 0xff) as f32 / 255.0,
    )
}

/// The full light set for a theme.
pub fn lights_for(theme: Theme) -> Vec<Light> {
    match theme {
        Theme::Light => vec![
            Light::ambient(Vec3::ONE, 0.8),
            Light::directional(LightRole::Primary, vec3(5.0, 5.0, 5.0), Vec3::ONE, 1.2),
            Light::directional(LightRole::Fill, vec3(-5.0, 2.0, 3.0), rgb(0xf0f4ff), 0.6),
            Light::directional(LightRole::Back, vec3(0.0, 3.0, -5.0), Vec3::ONE, 0.4),
        ],
        Theme::Dark => vec![
            Light::ambient(rgb(0x404060), 0.4),
            Light::directional(LightRole::Primary, vec3(5.0, 5.0, 5.0), Vec3::ONE, 1.0),
            Light::directional(LightRole::SubtleFill, vec3(-4.0, 1.0, 2.0), rgb(0x6070a0), 0.3),
        ],
    }
}

#[derive(Debug, Default)]
pub struct LightingRig {
    lights: Vec<Light>,
    theme: Option<Theme>,
}

impl LightingRig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every light added so far and installs the set for `theme`.
    pub fn rebuild(&mut self, theme: Theme) {
        let removed = self.lights.len();
        self.lights.clear();
        self.lights.extend(lights_for(theme));
        self.theme = Some(theme);
        log::debug!("lighting rebuilt for {theme} theme ({removed} removed, {} added)", self.lights.len());
    }

    pub fn theme(&self) -> Option<Theme> {
        self.theme
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn find(&self, role: LightRole) -> Option<&Light> {
        self.lights.iter().find(|light| light.role == role)
    }

    pub fn to_uniforms(&self) -> ([LightUniform; MAX_LIGHTS], u32) {
        let mut out = [LightUniform::default(); MAX_LIGHTS];
        let mut count = 0;
        for (slot, light) in out.iter_mut().zip(&self.lights) {
            *slot = light.to_uniform();
            count += 1;
        }
        (out, count)
    }
}
