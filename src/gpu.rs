//! GPU copies of meshes, materials and textures.

use std::collections::HashMap;
use std::panic;
use std::rc::Rc;

use flume::Sender;
use js_sys::{Array, Uint8Array};
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Blob, BlobPropertyBag, CanvasRenderingContext2d, HtmlCanvasElement, ImageBitmap};
use wgpu::util::DeviceExt;

use crate::material::ThemedMaterial;
use crate::resources::{AssetMessage, EmbeddedImage, MeshData, ModelData};
use crate::uniforms::MaterialUniform;

pub struct Texture {
    pub view: wgpu::TextureView,
}

impl Texture {
    pub fn from_bitmap(device: &wgpu::Device, queue: &wgpu::Queue, bitmap: ImageBitmap) -> Self {
        let width = bitmap.width();
        let height = bitmap.height();
        let size = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Base Color Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let uploaded = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            queue.copy_external_image_to_texture(
                &wgpu::ImageCopyExternalImage {
                    source: wgpu::ExternalImageSource::ImageBitmap(bitmap.clone()),
                    origin: wgpu::Origin2d::ZERO,
                    flip_y: false,
                },
                wgpu::ImageCopyTextureTagged {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                    color_space: wgpu::PredefinedColorSpace::Srgb,
                    premultiplied_alpha: false,
                },
                size,
            );
        }))
        .is_ok();

        if !uploaded {
            log::warn!("external image copy failed, uploading texture through a 2d canvas");
            if let Some(pixels) = read_pixels(&bitmap) {
                queue.write_texture(
                    wgpu::ImageCopyTexture {
                        texture: &texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    &pixels,
                    wgpu::ImageDataLayout { offset: 0, bytes_per_row: Some(4 * width), rows_per_image: Some(height) },
                    size,
                );
            }
        }

        Self { view: texture.create_view(&wgpu::TextureViewDescriptor::default()) }
    }

    pub fn single_pixel(device: &wgpu::Device, queue: &wgpu::Queue, color: [u8; 4]) -> Self {
        let size = wgpu::Extent3d { width: 1, height: 1, depth_or_array_layers: 1 };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Pixel Texture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &color,
            wgpu::ImageDataLayout { offset: 0, bytes_per_row: Some(4), rows_per_image: Some(1) },
            size,
        );
        Self { view: texture.create_view(&wgpu::TextureViewDescriptor::default()) }
    }
}

fn read_pixels(bitmap: &ImageBitmap) -> Option<Vec<u8>> {
    let document = web_sys::window()?.document()?;
    let canvas: HtmlCanvasElement = document.create_element("canvas").ok()?.unchecked_into();
    canvas.set_width(bitmap.width());
    canvas.set_height(bitmap.height());
    let context: CanvasRenderingContext2d = canvas.get_context("2d").ok()??.unchecked_into();
    context.draw_image_with_image_bitmap(bitmap, 0.0, 0.0).ok()?;
    let data = context.get_image_data(0.0, 0.0, bitmap.width() as f64, bitmap.height() as f64).ok()?;
    Some(data.data().0)
}

/// Decodes embedded images off the frame path; each finished texture is
/// posted back as [`AssetMessage::TextureLoaded`].
pub fn spawn_texture_decode(device: Rc<wgpu::Device>, queue: Rc<wgpu::Queue>, images: Vec<EmbeddedImage>, tx: Sender<AssetMessage>) {
    for image in images {
        let device = Rc::clone(&device);
        let queue = Rc::clone(&queue);
        let tx = tx.clone();
        wasm_bindgen_futures::spawn_local(async move {
            match decode(&image).await {
                Some(bitmap) => {
                    let texture = Texture::from_bitmap(&device, &queue, bitmap);
                    let _ = tx.send(AssetMessage::TextureLoaded { image_index: image.index, texture });
                }
                None => log::warn!("could not decode texture {} ({})", image.index, image.mime_type),
            }
        });
    }
}

async fn decode(image: &EmbeddedImage) -> Option<ImageBitmap> {
    let parts = Array::new();
    parts.push(&Uint8Array::from(image.bytes.as_slice()));
    let props = BlobPropertyBag::new();
    props.set_type(&image.mime_type);
    let blob = Blob::new_with_u8_array_sequence_and_options(&parts, &props).ok()?;
    let promise = web_sys::window()?.create_image_bitmap_with_blob(&blob).ok()?;
    JsFuture::from(promise).await.ok().map(|value| value.unchecked_into())
}

pub struct GpuMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub num_indices: u32,
    pub material: usize,
    pub blend: bool,
    pub center: glam::Vec3,
}

impl GpuMesh {
    pub fn upload(device: &wgpu::Device, mesh: &MeshData) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Vertex Buffer"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Index Buffer"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex_buffer,
            index_buffer,
            num_indices: mesh.indices.len() as u32,
            material: mesh.material,
            blend: mesh.blend,
            center: mesh.center(),
        }
    }
}

/// Shared pieces every material bind group needs.
pub struct MaterialBinder {
    pub layout: wgpu::BindGroupLayout,
    pub sampler: wgpu::Sampler,
    pub white: Rc<wgpu::TextureView>,
}

impl MaterialBinder {
    fn bind(&self, device: &wgpu::Device, buffer: &wgpu::Buffer, view: &wgpu::TextureView) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(view) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(&self.sampler) },
            ],
            label: Some("Material Bind Group"),
        })
    }
}

pub struct GpuMaterial {
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    view: Rc<wgpu::TextureView>,
}

impl GpuMaterial {
    pub fn new(device: &wgpu::Device, binder: &MaterialBinder, uniform: &MaterialUniform) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Material Buffer"),
            contents: bytemuck::cast_slice(&[*uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let view = Rc::clone(&binder.white);
        let bind_group = binder.bind(device, &buffer, &view);
        Self { buffer, bind_group, view }
    }

    pub fn write(&self, queue: &wgpu::Queue, uniform: &MaterialUniform) {
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(&[*uniform]));
    }

    pub fn set_texture(&mut self, device: &wgpu::Device, binder: &MaterialBinder, view: Rc<wgpu::TextureView>) {
        self.view = view;
        self.bind_group = binder.bind(device, &self.buffer, &self.view);
    }
}

pub struct GpuModel {
    pub meshes: Vec<GpuMesh>,
    pub materials: Vec<GpuMaterial>,
    /// glTF image index to the material slots sampling it.
    pub image_slots: HashMap<usize, Vec<usize>>,
}

impl GpuModel {
    pub fn upload(device: &wgpu::Device, binder: &MaterialBinder, model: &ModelData, materials: &[ThemedMaterial]) -> Self {
        Self {
            meshes: model.meshes.iter().map(|mesh| GpuMesh::upload(device, mesh)).collect(),
            materials: materials.iter().map(|m| GpuMaterial::new(device, binder, &m.to_uniform())).collect(),
            image_slots: model.materials_by_image(),
        }
    }

    pub fn write_materials(&self, queue: &wgpu::Queue, materials: &[ThemedMaterial]) {
        for (gpu, themed) in self.materials.iter().zip(materials) {
            gpu.write(queue, &themed.to_uniform());
        }
    }

    /// Swaps a decoded texture into every material that samples it and
    /// returns those slots.
    pub fn apply_texture(&mut self, device: &wgpu::Device, binder: &MaterialBinder, image_index: usize, texture: Texture) -> Vec<usize> {
        let Some(slots) = self.image_slots.get(&image_index) else {
            return Vec::new();
        };
        let view = Rc::new(texture.view);
        for &slot in slots {
            if let Some(material) = self.materials.get_mut(slot) {
                material.set_texture(device, binder, Rc::clone(&view));
            }
        }
        slots.clone()
    }
}
