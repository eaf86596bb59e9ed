use flume::{Receiver, Sender};
use glam::{vec2, Mat4, Quat, Vec2, Vec3};

use crate::config::ViewerConfig;
use crate::interaction::{Bounds, Hint, InteractionState, PointerSource, Release, RestPose};
use crate::lifecycle::{Lifecycle, ViewerPhase};
use crate::lighting::LightingRig;
use crate::material::{MaterialParams, ThemedMaterial};
use crate::resources::{AssetMessage, ModelData};
use crate::theme::ThemeReader;
use crate::uniforms::{CameraUniform, SceneUniform};

const CAMERA_EYE: Vec3 = Vec3::new(0.0, 0.0, 5.0);
const FOV_Y_DEGREES: f32 = 45.0;
const PLACEHOLDER_SPIN: f32 = 0.8;

/// Where and how large the model sits at rest. The scale depends on the
/// container width so small screens get a smaller model.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ModelPlacement {
    pub rest: RestPose,
    pub scale: f32,
}

impl ModelPlacement {
    pub fn for_viewport(config: &ViewerConfig, width_css: f32) -> Self {
        let p = &config.placement;
        let scale = if width_css < config.mobile_breakpoint { p.mobile_scale } else { p.desktop_scale };
        Self {
            rest: RestPose { rotation: Vec2::from(p.rest_rotation), position: Vec3::from(p.rest_position) },
            scale,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrawTarget {
    Nothing,
    Placeholder,
    Model,
}

/// Work the GPU side has to do after a frame update.
pub struct Frame {
    pub draw: DrawTarget,
    /// Newly parsed model to upload.
    pub model: Option<ModelData>,
    /// Material uniforms changed since the last frame.
    pub materials_dirty: bool,
    #[cfg(target_arch = "wasm32")]
    pub textures: Vec<(usize, crate::gpu::Texture)>,
}

struct LoadedModel {
    center: Vec3,
    extent: f32,
}

pub struct SceneState {
    config: ViewerConfig,
    theme: ThemeReader,
    lifecycle: Lifecycle,
    rig: LightingRig,
    materials: Vec<ThemedMaterial>,
    placeholder_material: ThemedMaterial,
    materials_dirty: bool,
    interaction: InteractionState,
    hint: Hint,
    placement: ModelPlacement,
    model: Option<LoadedModel>,
    bounds: Bounds,
    aspect_ratio: f32,
    placeholder_spin: f32,
    idle_spin: f32,
    last_time: Option<f64>,
    now: f32,
    last_touch_release: Option<f32>,
    pub scene_uniform: SceneUniform,
    tx: Sender<AssetMessage>,
    rx: Receiver<AssetMessage>,
}

impl SceneState {
    pub fn new(config: ViewerConfig, theme: ThemeReader, bounds: Bounds) -> Self {
        let (tx, rx) = flume::unbounded();
        let placement = ModelPlacement::for_viewport(&config, bounds.width);
        let placeholder_material = ThemedMaterial::new(
            Some("placeholder".to_string()),
            MaterialParams { base_color: Vec3::splat(0.55), ..Default::default() },
            false,
        );

        let mut state = Self {
            config,
            theme,
            lifecycle: Lifecycle::new(),
            rig: LightingRig::new(),
            materials: Vec::new(),
            placeholder_material,
            materials_dirty: true,
            interaction: InteractionState::at_rest(placement.rest),
            hint: Hint::Visible,
            placement,
            model: None,
            bounds,
            aspect_ratio: aspect(bounds.width, bounds.height),
            placeholder_spin: 0.0,
            idle_spin: 0.0,
            last_time: None,
            now: 0.0,
            last_touch_release: None,
            scene_uniform: SceneUniform::empty(),
            tx,
            rx,
        };
        state.sync_theme();
        if let Err(err) = state.lifecycle.mounted() {
            log::warn!("{err}");
        }
        state
    }

    pub fn phase(&self) -> ViewerPhase {
        self.lifecycle.phase()
    }

    pub fn progress(&self) -> f32 {
        self.lifecycle.progress()
    }

    pub fn interaction(&self) -> &InteractionState {
        &self.interaction
    }

    pub fn rig(&self) -> &LightingRig {
        &self.rig
    }

    pub fn materials(&self) -> &[ThemedMaterial] {
        &self.materials
    }

    pub fn placeholder_material(&self) -> &ThemedMaterial {
        &self.placeholder_material
    }

    pub fn placement(&self) -> ModelPlacement {
        self.placement
    }

    pub fn hint_opacity(&self) -> f32 {
        self.hint.opacity(self.now, self.config.interaction.hint_fade_seconds)
    }

    pub fn asset_sender(&self) -> Sender<AssetMessage> {
        self.tx.clone()
    }

    /// Returns the model URL the first time it is called on a mount that
    /// is showing its placeholder; `None` forever after.
    pub fn request_fetch(&mut self) -> Option<String> {
        match self.lifecycle.begin_fetch() {
            Ok(()) => Some(self.config.model_url.clone()),
            Err(err) => {
                log::debug!("fetch not started: {err}");
                None
            }
        }
    }

    /// Rebuilds lights and recolors materials if the theme changed since
    /// the last call. Returns whether anything was rebuilt.
    pub fn sync_theme(&mut self) -> bool {
        let Some(theme) = self.theme.poll_change() else {
            return false;
        };
        self.rig.rebuild(theme);
        for material in &mut self.materials {
            material.apply_theme(theme);
        }
        self.placeholder_material.apply_theme(theme);
        self.materials_dirty = true;
        let (lights, count) = self.rig.to_uniforms();
        self.scene_uniform.lights = lights;
        self.scene_uniform.light_count = count;
        log::info!("theme switched to {theme}");
        true
    }

    pub fn resize(&mut self, bounds: Bounds) {
        self.bounds = bounds;
        self.aspect_ratio = aspect(bounds.width, bounds.height);
        let placement = ModelPlacement::for_viewport(&self.config, bounds.width);
        if placement != self.placement {
            self.placement = placement;
            self.interaction.rest = placement.rest;
        }
    }

    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.bounds = bounds;
    }

    fn accepts_gestures(&self) -> bool {
        self.lifecycle.phase() == ViewerPhase::AssetLoaded
    }

    /// True while mouse events may still be the emulated echo of a tap.
    fn is_touch_echo(&self, source: PointerSource) -> bool {
        source == PointerSource::Mouse
            && self
                .last_touch_release
                .is_some_and(|at| self.now - at < self.config.interaction.touch_mouse_echo_seconds)
    }

    pub fn pointer_down(&mut self, source: PointerSource, x: f32, y: f32) {
        if self.is_touch_echo(source) {
            log::debug!("ignoring mouse press emulated from touch");
            return;
        }
        self.hint = self.hint.dismiss(self.now);
        if self.accepts_gestures() {
            self.interaction = self.interaction.press(vec2(x, y));
        }
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) {
        if self.interaction.is_dragging() {
            self.interaction = self.interaction.drag(vec2(x, y), self.bounds, &self.config.interaction);
        }
    }

    pub fn pointer_up(&mut self, source: PointerSource) -> Release {
        if self.is_touch_echo(source) {
            return Release::Ignored;
        }
        if source == PointerSource::Touch {
            self.last_touch_release = Some(self.now);
        }
        let (next, outcome) = self.interaction.release(&self.config.interaction);
        self.interaction = next;
        if outcome == Release::Click {
            log::debug!("idle rotation {}", if next.is_rotating { "on" } else { "off" });
        }
        outcome
    }

    fn drain_assets(&mut self, frame: &mut Frame) {
        while let Ok(message) = self.rx.try_recv() {
            match message {
                AssetMessage::Progress(ratio) => self.lifecycle.report_progress(ratio),
                AssetMessage::Loaded(model) => match self.lifecycle.loaded() {
                    Ok(()) => {
                        let theme = self.theme.current();
                        self.materials = model
                            .materials
                            .iter()
                            .map(|m| {
                                let mut themed = ThemedMaterial::new(m.name.clone(), m.params, false);
                                themed.apply_theme(theme);
                                themed
                            })
                            .collect();
                        self.materials_dirty = true;
                        self.model = Some(LoadedModel { center: model.center, extent: model.extent });
                        frame.model = Some(model);
                    }
                    Err(err) => log::warn!("dropping loaded model: {err}"),
                },
                AssetMessage::Failed(cause) => match self.lifecycle.failed() {
                    Ok(()) => log::error!("viewer showing error state: {cause}"),
                    Err(err) => log::warn!("{err}"),
                },
                #[cfg(target_arch = "wasm32")]
                AssetMessage::TextureLoaded { image_index, texture } => {
                    frame.textures.push((image_index, texture));
                }
            }
        }
    }

    /// Marks the materials sampling a freshly decoded texture.
    pub fn mark_textured(&mut self, slots: &[usize]) {
        for &slot in slots {
            if let Some(material) = self.materials.get_mut(slot) {
                material.set_has_texture(true);
                self.materials_dirty = true;
            }
        }
    }

    /// Advances one display frame. `time_ms` is the animation-frame
    /// timestamp.
    pub fn update(&mut self, time_ms: f64) -> Frame {
        let mut frame = Frame {
            draw: DrawTarget::Nothing,
            model: None,
            materials_dirty: false,
            #[cfg(target_arch = "wasm32")]
            textures: Vec::new(),
        };

        let dt = self.last_time.map_or(0.0, |last| ((time_ms - last) / 1000.0).clamp(0.0, 0.25)) as f32;
        self.last_time = Some(time_ms);
        self.now = (time_ms / 1000.0) as f32;

        self.drain_assets(&mut frame);
        self.sync_theme();
        self.hint = self.hint.tick(self.now, self.config.interaction.hint_fade_seconds);

        self.interaction = self.interaction.step(self.now, &self.config.interaction);
        if self.interaction.is_rotating {
            self.idle_spin = (self.idle_spin + self.config.interaction.idle_spin_speed * dt) % std::f32::consts::TAU;
        }
        self.placeholder_spin = (self.placeholder_spin + PLACEHOLDER_SPIN * dt) % std::f32::consts::TAU;

        let model_matrix = match (self.lifecycle.phase(), &self.model) {
            (ViewerPhase::AssetLoaded, Some(model)) => {
                frame.draw = DrawTarget::Model;
                let rotation = self.interaction.current_rotation;
                Mat4::from_translation(self.interaction.current_position)
                    * Mat4::from_quat(Quat::from_rotation_y(rotation.y + self.idle_spin) * Quat::from_rotation_x(rotation.x))
                    * Mat4::from_scale(Vec3::splat(self.placement.scale / model.extent))
                    * Mat4::from_translation(-model.center)
            }
            (ViewerPhase::PlaceholderVisible, _) => {
                frame.draw = DrawTarget::Placeholder;
                Mat4::from_translation(self.interaction.current_position)
                    * Mat4::from_quat(Quat::from_rotation_y(self.placeholder_spin) * Quat::from_rotation_x(self.placeholder_spin * 0.5))
            }
            _ => Mat4::IDENTITY,
        };

        self.update_camera_uniforms();
        self.scene_uniform.model = model_matrix.to_cols_array_2d();
        self.scene_uniform.time = self.now;

        frame.materials_dirty = std::mem::take(&mut self.materials_dirty);
        frame
    }

    fn update_camera_uniforms(&mut self) {
        let view = Mat4::look_at_rh(CAMERA_EYE, Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), self.aspect_ratio, 0.1, 100.0);
        let view_proj = proj * view;
        self.scene_uniform.camera = CameraUniform {
            view_proj: view_proj.to_cols_array_2d(),
            inv_view_proj: view_proj.inverse().to_cols_array_2d(),
            camera_pos: CAMERA_EYE.extend(1.0).to_array(),
        };
    }

    /// Camera-space distance used to order transparent meshes.
    pub fn distance_to_camera(&self, local_center: Vec3) -> f32 {
        let world = Mat4::from_cols_array_2d(&self.scene_uniform.model).transform_point3(local_center);
        world.distance_squared(CAMERA_EYE)
    }
}

fn aspect(width: f32, height: f32) -> f32 {
    if height > 0.0 && width > 0.0 { width / height } else { 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;
    use crate::lighting::LightRole;
    use crate::resources::tests::{glb, triangle_bin, triangle_json};
    use crate::theme::{Theme, ThemePublisher};

    fn bounds() -> Bounds {
        Bounds::new(0.0, 0.0, 1200.0, 600.0)
    }

    fn scene(theme: Theme) -> (ThemePublisher, SceneState) {
        let publisher = ThemePublisher::new(theme);
        let state = SceneState::new(ViewerConfig::default(), publisher.reader(), bounds());
        (publisher, state)
    }

    fn model() -> ModelData {
        ModelData::from_glb(&glb(&triangle_json(""), &triangle_bin())).unwrap()
    }

    #[test]
    fn mount_shows_placeholder_with_theme_lights() {
        let (_publisher, mut state) = scene(Theme::Dark);
        assert_eq!(state.phase(), ViewerPhase::PlaceholderVisible);
        assert!(state.rig().find(LightRole::SubtleFill).is_some());
        assert_eq!(state.scene_uniform.light_count, 3);
        let frame = state.update(16.0);
        assert_eq!(frame.draw, DrawTarget::Placeholder);
        assert!(frame.materials_dirty);
        assert!(!state.update(32.0).materials_dirty);
    }

    #[test]
    fn only_one_fetch_per_mount() {
        let (_publisher, mut state) = scene(Theme::Light);
        assert_eq!(state.request_fetch().as_deref(), Some("/api/model"));
        assert_eq!(state.request_fetch(), None);
        state.asset_sender().send(AssetMessage::Failed(crate::error::ViewerError::Status(404))).unwrap();
        let frame = state.update(0.0);
        assert_eq!(state.phase(), ViewerPhase::AssetFailed);
        assert_eq!(frame.draw, DrawTarget::Nothing);
        assert_eq!(state.request_fetch(), None);
    }

    #[test]
    fn loaded_model_replaces_placeholder_and_is_themed() {
        let (_publisher, mut state) = scene(Theme::Light);
        state.request_fetch();
        let tx = state.asset_sender();
        tx.send(AssetMessage::Progress(0.5)).unwrap();
        tx.send(AssetMessage::Loaded(model())).unwrap();
        let frame = state.update(0.0);
        assert_eq!(state.phase(), ViewerPhase::AssetLoaded);
        assert_eq!(frame.draw, DrawTarget::Model);
        assert!(frame.model.is_some());
        assert!(frame.materials_dirty);
        let navy = &state.materials()[0];
        assert!((navy.current().base_color - vec3(0.2, 0.2, 0.9)).length() < 1e-6);
    }

    #[test]
    fn theme_change_rebuilds_lights_and_materials() {
        let (publisher, mut state) = scene(Theme::Light);
        state.request_fetch();
        state.asset_sender().send(AssetMessage::Loaded(model())).unwrap();
        state.update(0.0);
        assert!(!state.sync_theme());

        publisher.publish(Theme::Dark);
        assert!(state.sync_theme());
        assert_eq!(state.rig().lights().len(), 3);
        assert!(state.rig().find(LightRole::Fill).is_none());
        assert!((state.materials()[0].current().base_color - vec3(0.09, 0.09, 0.405)).length() < 1e-6);
        assert!(state.update(16.0).materials_dirty);
        // interaction is untouched by theme changes
        assert_eq!(state.interaction().current_rotation, state.placement().rest.rotation);
    }

    #[test]
    fn gestures_wait_for_the_model() {
        let (_publisher, mut state) = scene(Theme::Light);
        state.pointer_down(PointerSource::Mouse, 10.0, 10.0);
        assert!(!state.interaction().is_dragging());

        state.request_fetch();
        state.asset_sender().send(AssetMessage::Loaded(model())).unwrap();
        state.update(1000.0);
        assert_eq!(state.hint_opacity(), 0.0);
        state.pointer_down(PointerSource::Touch, 600.0, 300.0);
        state.pointer_move(700.0, 300.0);
        assert!(state.interaction().is_dragging());
        assert_eq!(state.pointer_up(PointerSource::Touch), Release::Drag);
        assert!(!state.interaction().is_dragging());
    }

    #[test]
    fn resize_switches_to_mobile_scale() {
        let (_publisher, mut state) = scene(Theme::Light);
        assert_eq!(state.placement().scale, 2.2);
        state.resize(Bounds::new(0.0, 0.0, 390.0, 400.0));
        assert_eq!(state.placement().scale, 1.6);
    }
}
