//! Drag-to-reorient and spring-back for the hero model.
//!
//! [`InteractionState`] is a `Copy` snapshot; every transition takes the
//! state by value and returns the next one. The per-frame [`InteractionState::step`]
//! runs whether or not a drag is active.

use glam::{vec2, vec3, Vec2, Vec3};

use crate::config::InteractionConfig;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RestPose {
    /// Pitch (`x`) and yaw (`y`) in radians.
    pub rotation: Vec2,
    pub position: Vec3,
}

impl Default for RestPose {
    fn default() -> Self {
        Self { rotation: Vec2::ZERO, position: Vec3::ZERO }
    }
}

/// Size and origin of the element receiving pointer input, in CSS pixels.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bounds {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self { left, top, width, height }
    }

    pub fn center(&self) -> Vec2 {
        vec2(self.left + self.width * 0.5, self.top + self.height * 0.5)
    }

    /// Pointer position relative to the center, `-1..1` at the edges.
    pub fn normalized(&self, point: Vec2) -> Vec2 {
        let half = vec2(self.width.max(1.0), self.height.max(1.0)) * 0.5;
        (point - self.center()) / half
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DragPhase {
    Idle,
    Dragging {
        origin: Vec2,
        /// Largest distance from the origin seen during this gesture.
        travelled: f32,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PointerSource {
    Mouse,
    Touch,
}

impl PointerSource {
    /// Only the primary button drives the model.
    pub fn from_mouse_button(button: i16) -> Option<Self> {
        (button == 0).then_some(PointerSource::Mouse)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Release {
    /// Pointer went up without an active press.
    Ignored,
    Click,
    Drag,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct InteractionState {
    pub phase: DragPhase,
    pub rest: RestPose,
    pub target_rotation: Vec2,
    pub current_rotation: Vec2,
    pub target_position: Vec3,
    pub current_position: Vec3,
    pub is_rotating: bool,
}

impl InteractionState {
    pub fn at_rest(rest: RestPose) -> Self {
        Self {
            phase: DragPhase::Idle,
            rest,
            target_rotation: rest.rotation,
            current_rotation: rest.rotation,
            target_position: rest.position,
            current_position: rest.position,
            is_rotating: false,
        }
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.phase, DragPhase::Dragging { .. })
    }

    pub fn press(self, at: Vec2) -> Self {
        Self { phase: DragPhase::Dragging { origin: at, travelled: 0.0 }, ..self }
    }

    pub fn drag(self, at: Vec2, bounds: Bounds, config: &InteractionConfig) -> Self {
        let DragPhase::Dragging { origin, travelled } = self.phase else {
            return self;
        };
        let delta = at - origin;
        let max_tilt = config.max_tilt_degrees.to_radians();

        let yaw = self.rest.rotation.y + delta.x * config.horizontal_sensitivity;
        let pitch = (self.rest.rotation.x - delta.y * config.vertical_sensitivity)
            .clamp(self.rest.rotation.x - max_tilt, self.rest.rotation.x + max_tilt);
        let rotation = vec2(pitch, yaw);

        let offset = bounds.normalized(at) * config.position_offset;
        let target_position = self.rest.position + vec3(offset.x, -offset.y, 0.0);

        Self {
            phase: DragPhase::Dragging { origin, travelled: travelled.max(delta.length()) },
            target_rotation: rotation,
            current_rotation: rotation,
            target_position,
            ..self
        }
    }

    /// Ends the gesture. Targets snap back to the rest pose; the visible
    /// transform follows over the next frames.
    pub fn release(self, config: &InteractionConfig) -> (Self, Release) {
        let DragPhase::Dragging { travelled, .. } = self.phase else {
            return (self, Release::Ignored);
        };
        let outcome = if travelled <= config.click_slop { Release::Click } else { Release::Drag };
        let next = Self {
            phase: DragPhase::Idle,
            target_rotation: self.rest.rotation,
            target_position: self.rest.position,
            is_rotating: if outcome == Release::Click { !self.is_rotating } else { self.is_rotating },
            ..self
        };
        (next, outcome)
    }

    /// One frame of smoothing. `time` is in seconds and only drives the
    /// idle bob.
    pub fn step(self, time: f32, config: &InteractionConfig) -> Self {
        let mut next = self;
        if !self.is_dragging() {
            let bob = (time * config.bob_speed).sin() * config.bob_amplitude;
            next.target_rotation = self.rest.rotation;
            next.target_position = self.rest.position + vec3(0.0, bob, 0.0);
            next.current_rotation += (next.target_rotation - self.current_rotation) * config.rotation_blend;
        }
        next.current_position += (next.target_position - self.current_position) * config.position_blend;
        next
    }
}

/// One-time "drag to rotate" hint. Fades out on the first press and never
/// comes back for the lifetime of the mount.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Hint {
    Visible,
    FadingOut { started_at: f32 },
    Dismissed,
}

impl Hint {
    pub fn dismiss(self, now: f32) -> Self {
        match self {
            Hint::Visible => Hint::FadingOut { started_at: now },
            other => other,
        }
    }

    pub fn tick(self, now: f32, fade_seconds: f32) -> Self {
        match self {
            Hint::FadingOut { started_at } if now - started_at >= fade_seconds => Hint::Dismissed,
            other => other,
        }
    }

    pub fn opacity(self, now: f32, fade_seconds: f32) -> f32 {
        match self {
            Hint::Visible => 1.0,
            Hint::FadingOut { started_at } if fade_seconds > 0.0 => {
                (1.0 - (now - started_at) / fade_seconds).clamp(0.0, 1.0)
            }
            Hint::FadingOut { .. } | Hint::Dismissed => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> Bounds {
        Bounds::new(0.0, 0.0, 400.0, 300.0)
    }

    fn rest() -> RestPose {
        RestPose { rotation: vec2(0.1, -0.5), position: vec3(0.0, -0.2, 0.0) }
    }

    fn still() -> InteractionConfig {
        InteractionConfig { bob_amplitude: 0.0, ..Default::default() }
    }

    #[test]
    fn drag_applies_rotation_immediately() {
        let config = InteractionConfig::default();
        let state = InteractionState::at_rest(rest()).press(vec2(200.0, 150.0)).drag(vec2(250.0, 130.0), bounds(), &config);
        assert!((state.current_rotation.y - (-0.5 + 0.5)).abs() < 1e-6);
        // upward drag tilts positively
        assert!((state.current_rotation.x - (0.1 + 0.1)).abs() < 1e-6);
        assert_eq!(state.current_rotation, state.target_rotation);
    }

    #[test]
    fn horizontal_drag_turns_faster_than_vertical() {
        let config = InteractionConfig::default();
        let start = InteractionState::at_rest(RestPose::default()).press(vec2(200.0, 150.0));
        let h = start.drag(vec2(220.0, 150.0), bounds(), &config);
        let v = start.drag(vec2(200.0, 170.0), bounds(), &config);
        assert!(h.current_rotation.y.abs() > v.current_rotation.x.abs());
        assert!(v.current_rotation.x < 0.0);
    }

    #[test]
    fn vertical_tilt_is_clamped() {
        let config = InteractionConfig::default();
        let max = 45f32.to_radians();
        let mut state = InteractionState::at_rest(rest()).press(vec2(200.0, 150.0));
        for dy in [-100_000.0, -500.0, -1.0, 0.0, 1.0, 300.0, 100_000.0] {
            state = state.drag(vec2(200.0, 150.0 + dy), bounds(), &config);
            let offset = state.target_rotation.x - rest().rotation.x;
            assert!(offset >= -max - 1e-6 && offset <= max + 1e-6, "offset {offset} for dy {dy}");
        }
    }

    #[test]
    fn position_offset_follows_pointer_distance_from_center() {
        let config = InteractionConfig::default();
        let state = InteractionState::at_rest(rest()).press(vec2(200.0, 150.0)).drag(vec2(400.0, 0.0), bounds(), &config);
        assert!((state.target_position - (rest().position + vec3(0.3, 0.3, 0.0))).length() < 1e-6);
        // position is smoothed even while dragging
        assert_eq!(state.current_position, rest().position);
        let stepped = state.step(0.0, &config);
        assert!(stepped.current_position.x > 0.0 && stepped.current_position.x < 0.3);
    }

    #[test]
    fn move_without_press_is_ignored() {
        let state = InteractionState::at_rest(rest());
        assert_eq!(state.drag(vec2(10.0, 10.0), bounds(), &InteractionConfig::default()), state);
        let (after, outcome) = state.release(&InteractionConfig::default());
        assert_eq!(outcome, Release::Ignored);
        assert_eq!(after, state);
    }

    #[test]
    fn release_resets_targets_not_current() {
        let config = InteractionConfig::default();
        let dragged = InteractionState::at_rest(rest()).press(vec2(0.0, 0.0)).drag(vec2(120.0, 40.0), bounds(), &config);
        let (released, outcome) = dragged.release(&config);
        assert_eq!(outcome, Release::Drag);
        assert!(!released.is_dragging());
        assert_eq!(released.target_rotation, rest().rotation);
        assert_eq!(released.target_position, rest().position);
        assert_eq!(released.current_rotation, dragged.current_rotation);
    }

    #[test]
    fn springback_converges_monotonically() {
        let config = still();
        let mut state = InteractionState::at_rest(RestPose::default());
        state.current_rotation = vec2(0.0, 90f32.to_radians());
        state.current_position = vec3(0.3, -0.3, 0.0);

        let mut last_rot = f32::MAX;
        let mut last_pos = f32::MAX;
        for frame in 0..30 {
            state = state.step(frame as f32 / 60.0, &config);
            let rot = (state.current_rotation - state.rest.rotation).length();
            let pos = (state.current_position - state.rest.position).length();
            assert!(rot < last_rot && pos < last_pos);
            last_rot = rot;
            last_pos = pos;
        }
        assert!(last_rot < 1f32.to_radians());

        for frame in 30..120 {
            state = state.step(frame as f32 / 60.0, &config);
        }
        assert!((state.current_position - state.rest.position).length() < 1e-3);
    }

    #[test]
    fn idle_bob_stays_within_amplitude() {
        let config = InteractionConfig::default();
        let mut state = InteractionState::at_rest(rest());
        for frame in 0..600 {
            state = state.step(frame as f32 / 60.0, &config);
            let dy = state.current_position.y - rest().position.y;
            assert!(dy.abs() <= config.bob_amplitude + 1e-6);
            assert_eq!(state.current_rotation, rest().rotation);
        }
    }

    #[test]
    fn short_gesture_toggles_idle_rotation() {
        let config = InteractionConfig::default();
        let state = InteractionState::at_rest(rest());
        let (clicked, outcome) = state.press(vec2(50.0, 50.0)).drag(vec2(52.0, 51.0), bounds(), &config).release(&config);
        assert_eq!(outcome, Release::Click);
        assert!(clicked.is_rotating);

        let (clicked_again, _) = clicked.press(vec2(10.0, 10.0)).release(&config);
        assert!(!clicked_again.is_rotating);

        let (dragged, outcome) = clicked.press(vec2(50.0, 50.0)).drag(vec2(150.0, 50.0), bounds(), &config).drag(vec2(50.0, 50.0), bounds(), &config).release(&config);
        assert_eq!(outcome, Release::Drag);
        assert!(dragged.is_rotating);
    }

    #[test]
    fn only_primary_mouse_button_counts() {
        assert_eq!(PointerSource::from_mouse_button(0), Some(PointerSource::Mouse));
        for button in [1, 2, 3, 4] {
            assert_eq!(PointerSource::from_mouse_button(button), None);
        }
    }

    #[test]
    fn hint_fades_once() {
        let hint = Hint::Visible;
        assert_eq!(hint.opacity(0.0, 0.6), 1.0);
        let fading = hint.dismiss(1.0);
        assert!((fading.opacity(1.3, 0.6) - 0.5).abs() < 1e-5);
        assert_eq!(fading.dismiss(2.0), fading);
        let gone = fading.tick(1.7, 0.6);
        assert_eq!(gone, Hint::Dismissed);
        assert_eq!(gone.dismiss(5.0), Hint::Dismissed);
        assert_eq!(gone.opacity(5.0, 0.6), 0.0);
    }
}
