use std::rc::Rc;

use web_sys::HtmlCanvasElement;
use wgpu::util::DeviceExt;

use crate::config::resolve_sample_count;
use crate::error::ViewerError;
use crate::gpu::{GpuMaterial, GpuMesh, GpuModel, MaterialBinder, Texture};
use crate::material::ThemedMaterial;
use crate::resources::{sphere_mesh, ModelData};
use crate::state::{DrawTarget, Frame, SceneState};
use crate::uniforms::{ModelVertex, SceneUniform};

const PLACEHOLDER_RADIUS: f32 = 0.5;
const PLACEHOLDER_SEGMENTS: u32 = 32;

pub struct Renderer {
    surface: wgpu::Surface<'static>,
    pub device: Rc<wgpu::Device>,
    pub queue: Rc<wgpu::Queue>,
    config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,
    msaa_view: Option<wgpu::TextureView>,
    sample_count: u32,
    opaque_pipeline: wgpu::RenderPipeline,
    transparent_pipeline: wgpu::RenderPipeline,
    binder: MaterialBinder,
    scene_buffer: wgpu::Buffer,
    scene_bind_group: wgpu::BindGroup,
    placeholder: (GpuMesh, GpuMaterial),
    model: Option<GpuModel>,
}

impl Renderer {
    pub async fn new(
        canvas: HtmlCanvasElement,
        is_mobile: bool,
        sample_count: u32,
        placeholder_material: &ThemedMaterial,
    ) -> Result<Self, ViewerError> {
        // GL only on mobile, WebGPU adapters there are unreliable
        let backends = if is_mobile { wgpu::Backends::GL } else { wgpu::Backends::GL | wgpu::Backends::BROWSER_WEBGPU };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor { backends, ..Default::default() });

        let width = canvas.width().max(1);
        let height = canvas.height().max(1);
        let surface = instance
            .create_surface(wgpu::SurfaceTarget::Canvas(canvas))
            .map_err(|e| ViewerError::Surface(e.to_string()))?;

        let adapter = request_adapter(&instance, &surface).await.ok_or(ViewerError::Adapter)?;
        let info = adapter.get_info();
        log::info!("using {:?} adapter {}", info.backend, info.name);

        let mut required_limits = if info.backend == wgpu::Backend::Gl {
            wgpu::Limits::downlevel_defaults()
        } else {
            wgpu::Limits::downlevel_webgl2_defaults()
        };
        required_limits.max_texture_dimension_2d = adapter.limits().max_texture_dimension_2d;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor { required_features: wgpu::Features::empty(), required_limits, label: None },
                None,
            )
            .await
            .map_err(|e| ViewerError::Device(e.to_string()))?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .unwrap_or(wgpu::TextureFormat::Rgba8Unorm);
        // transparent canvas so the page background shows through
        let alpha_mode = caps
            .alpha_modes
            .iter()
            .copied()
            .find(|&mode| mode == wgpu::CompositeAlphaMode::PreMultiplied)
            .or_else(|| caps.alpha_modes.first().copied())
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let sample_count = if info.backend == wgpu::Backend::Gl {
            log::warn!("WebGL backend, rendering without MSAA");
            1
        } else {
            let color = adapter.get_texture_format_features(format).flags;
            let depth = adapter.get_texture_format_features(wgpu::TextureFormat::Depth32Float).flags;
            let resolved = resolve_sample_count(sample_count, |n| color.sample_count_supported(n) && depth.sample_count_supported(n));
            if resolved != sample_count {
                log::warn!("{sample_count}x MSAA unsupported for {format:?}, using {resolved}x");
            }
            resolved
        };

        let depth_view = create_depth_view(&device, &config, sample_count);
        let msaa_view = create_msaa_view(&device, &config, sample_count);

        let shader = device.create_shader_module(wgpu::include_wgsl!("shader.wgsl"));

        let scene_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scene Buffer"),
            contents: bytemuck::cast_slice(&[SceneUniform::empty()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let scene_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
            label: Some("Scene Layout"),
        });
        let scene_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &scene_layout,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: scene_buffer.as_entire_binding() }],
            label: Some("Scene Bind Group"),
        });

        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
            label: Some("Material Layout"),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Main Pipeline Layout"),
            bind_group_layouts: &[&scene_layout, &material_layout],
            push_constant_ranges: &[],
        });

        let create_pipeline = |label: &str, blend: Option<wgpu::BlendState>, depth_write_enabled: bool| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_model",
                    buffers: &[ModelVertex::desc()],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: "fs_model",
                    targets: &[Some(wgpu::ColorTargetState { format: config.format, blend, write_mask: wgpu::ColorWrites::ALL })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState { cull_mode: Some(wgpu::Face::Back), ..Default::default() },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: wgpu::TextureFormat::Depth32Float,
                    depth_write_enabled,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: Default::default(),
                    bias: Default::default(),
                }),
                multisample: wgpu::MultisampleState { count: sample_count, mask: !0, alpha_to_coverage_enabled: false },
                multiview: None,
            })
        };
        let opaque_pipeline = create_pipeline("Opaque Pipeline", None, true);
        let transparent_pipeline = create_pipeline("Transparent Pipeline", Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING), false);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let white = Texture::single_pixel(&device, &queue, [255, 255, 255, 255]);
        let binder = MaterialBinder { layout: material_layout, sampler, white: Rc::new(white.view) };

        let placeholder = (
            GpuMesh::upload(&device, &sphere_mesh(PLACEHOLDER_RADIUS, PLACEHOLDER_SEGMENTS)),
            GpuMaterial::new(&device, &binder, &placeholder_material.to_uniform()),
        );

        Ok(Self {
            surface,
            device: Rc::new(device),
            queue: Rc::new(queue),
            config,
            depth_view,
            msaa_view,
            sample_count,
            opaque_pipeline,
            transparent_pipeline,
            binder,
            scene_buffer,
            scene_bind_group,
            placeholder,
            model: None,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || (width == self.config.width && height == self.config.height) {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.depth_view = create_depth_view(&self.device, &self.config, self.sample_count);
        self.msaa_view = create_msaa_view(&self.device, &self.config, self.sample_count);
    }

    pub fn upload_model(&mut self, model: &ModelData, materials: &[ThemedMaterial]) {
        self.model = Some(GpuModel::upload(&self.device, &self.binder, model, materials));
    }

    /// Pushes the current theme state of every material and the lights.
    pub fn write_scene(&self, state: &SceneState) {
        self.queue.write_buffer(&self.scene_buffer, 0, bytemuck::cast_slice(&[state.scene_uniform]));
        self.placeholder.1.write(&self.queue, &state.placeholder_material().to_uniform());
        if let Some(model) = &self.model {
            model.write_materials(&self.queue, state.materials());
        }
    }

    /// Applies one frame's worth of GPU work, then draws.
    pub fn frame(&mut self, state: &mut SceneState, frame: Frame) {
        if let Some(model) = frame.model {
            self.upload_model(&model, state.materials());
            if !model.images.is_empty() {
                crate::gpu::spawn_texture_decode(
                    Rc::clone(&self.device),
                    Rc::clone(&self.queue),
                    model.images,
                    state.asset_sender(),
                );
            }
        }

        let mut materials_dirty = frame.materials_dirty;
        for (image_index, texture) in frame.textures {
            if let Some(model) = &mut self.model {
                let slots = model.apply_texture(&self.device, &self.binder, image_index, texture);
                state.mark_textured(&slots);
                materials_dirty |= !slots.is_empty();
            }
        }

        if materials_dirty {
            self.write_scene(state);
        } else {
            self.queue.write_buffer(&self.scene_buffer, 0, bytemuck::cast_slice(&[state.scene_uniform]));
        }

        self.render(state, frame.draw);
    }

    fn render(&self, state: &SceneState, draw: DrawTarget) {
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost) => {
                self.surface.configure(&self.device, &self.config);
                return;
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                log::error!("surface out of memory");
                return;
            }
            Err(e) => {
                log::warn!("{e:?}");
                return;
            }
        };

        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Render Encoder") });

        {
            let (color_view, resolve_target) = match &self.msaa_view {
                Some(msaa_view) => (msaa_view, Some(&view)),
                None => (&view, None),
            };

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Main Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    resolve_target,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT), store: wgpu::StoreOp::Store },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Discard }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_bind_group(0, &self.scene_bind_group, &[]);

            match (draw, &self.model) {
                (DrawTarget::Placeholder, _) => {
                    let (mesh, material) = &self.placeholder;
                    render_pass.set_pipeline(&self.opaque_pipeline);
                    render_pass.set_bind_group(1, &material.bind_group, &[]);
                    render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                    render_pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    render_pass.draw_indexed(0..mesh.num_indices, 0, 0..1);
                }
                (DrawTarget::Model, Some(model)) => {
                    render_pass.set_pipeline(&self.opaque_pipeline);
                    for mesh in model.meshes.iter().filter(|m| !m.blend) {
                        draw_mesh(&mut render_pass, model, mesh);
                    }

                    let mut transparent: Vec<(&GpuMesh, f32)> = model
                        .meshes
                        .iter()
                        .filter(|m| m.blend)
                        .map(|m| (m, state.distance_to_camera(m.center)))
                        .collect();
                    transparent.sort_by(|a, b| b.1.total_cmp(&a.1));

                    render_pass.set_pipeline(&self.transparent_pipeline);
                    for (mesh, _) in transparent {
                        draw_mesh(&mut render_pass, model, mesh);
                    }
                }
                _ => {}
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
    }
}

fn draw_mesh<'a>(render_pass: &mut wgpu::RenderPass<'a>, model: &'a GpuModel, mesh: &'a GpuMesh) {
    let Some(material) = model.materials.get(mesh.material) else {
        return;
    };
    render_pass.set_bind_group(1, &material.bind_group, &[]);
    render_pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
    render_pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
    render_pass.draw_indexed(0..mesh.num_indices, 0, 0..1);
}

/// Walks from the preferred adapter down to anything that can draw.
async fn request_adapter(instance: &wgpu::Instance, surface: &wgpu::Surface<'static>) -> Option<wgpu::Adapter> {
    let attempts = [
        (wgpu::PowerPreference::HighPerformance, true, false),
        (wgpu::PowerPreference::HighPerformance, true, true),
        (wgpu::PowerPreference::LowPower, true, false),
        (wgpu::PowerPreference::LowPower, true, true),
        (wgpu::PowerPreference::HighPerformance, false, true),
        (wgpu::PowerPreference::LowPower, false, true),
    ];
    for (power_preference, with_surface, force_fallback_adapter) in attempts {
        let options = wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: with_surface.then_some(surface),
            force_fallback_adapter,
        };
        if let Some(adapter) = instance.request_adapter(&options).await {
            return Some(adapter);
        }
    }
    None
}

fn create_depth_view(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration, sample_count: u32) -> wgpu::TextureView {
    device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Texture"),
            size: wgpu::Extent3d { width: config.width, height: config.height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

fn create_msaa_view(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration, sample_count: u32) -> Option<wgpu::TextureView> {
    if sample_count <= 1 {
        return None;
    }
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("MSAA Texture"),
        size: wgpu::Extent3d { width: config.width, height: config.height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count,
        dimension: wgpu::TextureDimension::D2,
        format: config.format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    Some(texture.create_view(&wgpu::TextureViewDescriptor::default()))
}
