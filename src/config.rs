//! Viewer tuning. Every field has a default; the page may override any
//! subset by passing a JSON object to `mountViewer`.

use serde::Deserialize;

use crate::error::ViewerError;

pub const DEFAULT_MODEL_URL: &str = "/api/model";
/// MSAA counts WebGPU accepts for render attachments.
pub const SUPPORTED_SAMPLE_COUNTS: [u32; 2] = [1, 4];

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewerConfig {
    pub model_url: String,
    pub sample_count: u32,
    /// Container widths below this many CSS pixels use the mobile scale.
    pub mobile_breakpoint: f32,
    pub placement: PlacementConfig,
    pub interaction: InteractionConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            model_url: DEFAULT_MODEL_URL.to_string(),
            sample_count: 4,
            mobile_breakpoint: 768.0,
            placement: PlacementConfig::default(),
            interaction: InteractionConfig::default(),
        }
    }
}

impl ViewerConfig {
    pub fn from_json(raw: &str) -> Result<Self, ViewerError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_json::from_str(raw).map_err(|e| ViewerError::Config(e.to_string()))?;
        if !SUPPORTED_SAMPLE_COUNTS.contains(&config.sample_count) {
            return Err(ViewerError::Config(format!("sampleCount must be 1 or 4, got {}", config.sample_count)));
        }
        Ok(config)
    }
}

/// Largest supported count not above `requested`; 1 always works.
pub fn resolve_sample_count(requested: u32, supported: impl Fn(u32) -> bool) -> u32 {
    SUPPORTED_SAMPLE_COUNTS
        .iter()
        .rev()
        .copied()
        .filter(|&n| n <= requested.max(1))
        .find(|&n| n == 1 || supported(n))
        .unwrap_or(1)
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlacementConfig {
    /// Rest pitch and yaw in radians.
    pub rest_rotation: [f32; 2],
    pub rest_position: [f32; 3],
    pub desktop_scale: f32,
    pub mobile_scale: f32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            rest_rotation: [0.15, -0.6],
            rest_position: [0.0, -0.2, 0.0],
            desktop_scale: 2.2,
            mobile_scale: 1.6,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InteractionConfig {
    /// Radians of yaw per pixel of horizontal drag.
    pub horizontal_sensitivity: f32,
    /// Radians of pitch per pixel of vertical drag.
    pub vertical_sensitivity: f32,
    pub max_tilt_degrees: f32,
    /// World units of offset when the pointer sits on the container edge.
    pub position_offset: f32,
    pub rotation_blend: f32,
    pub position_blend: f32,
    pub bob_amplitude: f32,
    /// Radians per second.
    pub bob_speed: f32,
    pub click_slop: f32,
    pub hint_fade_seconds: f32,
    /// Radians per second of yaw while idle rotation is on.
    pub idle_spin_speed: f32,
    /// Mouse events this soon after a touch release are the browser's
    /// emulation of that touch and are ignored.
    pub touch_mouse_echo_seconds: f32,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            horizontal_sensitivity: 0.01,
            vertical_sensitivity: 0.005,
            max_tilt_degrees: 45.0,
            position_offset: 0.3,
            rotation_blend: 0.2,
            position_blend: 0.1,
            bob_amplitude: 0.05,
            bob_speed: 1.5,
            click_slop: 4.0,
            hint_fade_seconds: 0.6,
            idle_spin_speed: 0.5,
            touch_mouse_echo_seconds: 0.8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_defaults() {
        assert_eq!(ViewerConfig::from_json("").unwrap(), ViewerConfig::default());
        assert_eq!(ViewerConfig::from_json("{}").unwrap(), ViewerConfig::default());
    }

    #[test]
    fn partial_override_keeps_other_fields() {
        let config = ViewerConfig::from_json(
            r#"{"modelUrl": "/models/globe.glb", "interaction": {"rotationBlend": 0.3}}"#,
        )
        .unwrap();
        assert_eq!(config.model_url, "/models/globe.glb");
        assert_eq!(config.interaction.rotation_blend, 0.3);
        assert_eq!(config.interaction.position_blend, 0.1);
        assert_eq!(config.placement, PlacementConfig::default());
    }

    #[test]
    fn unsupported_sample_counts_are_rejected() {
        for count in [0, 2, 3, 8] {
            let err = ViewerConfig::from_json(&format!("{{\"sampleCount\": {count}}}")).unwrap_err();
            assert!(matches!(err, ViewerError::Config(ref msg) if msg.contains("sampleCount")), "{count}: {err}");
        }
        assert_eq!(ViewerConfig::from_json(r#"{"sampleCount": 1}"#).unwrap().sample_count, 1);
        assert_eq!(ViewerConfig::from_json(r#"{"sampleCount": 4}"#).unwrap().sample_count, 4);
    }

    #[test]
    fn sample_count_falls_back_to_what_the_adapter_supports() {
        assert_eq!(resolve_sample_count(4, |_| true), 4);
        assert_eq!(resolve_sample_count(4, |n| n != 4), 1);
        assert_eq!(resolve_sample_count(1, |_| true), 1);
        assert_eq!(resolve_sample_count(8, |_| true), 4);
        assert_eq!(resolve_sample_count(2, |_| true), 1);
        assert_eq!(resolve_sample_count(0, |_| false), 1);
    }

    #[test]
    fn malformed_input_is_a_config_error() {
        let err = ViewerConfig::from_json("{\"sampleCount\": \"four\"}").unwrap_err();
        assert!(matches!(err, ViewerError::Config(_)));
    }
}
