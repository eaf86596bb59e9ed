use bytemuck::{Pod, Zeroable};

pub const MAX_LIGHTS: usize = 4;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub inv_view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
}

/// `direction.w` is 0 for ambient and 1 for directional lights.
/// `color.w` carries the intensity.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct LightUniform {
    pub direction: [f32; 4],
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SceneUniform {
    pub camera: CameraUniform,
    pub lights: [LightUniform; MAX_LIGHTS],
    pub model: [[f32; 4]; 4],
    pub light_count: u32,
    pub time: f32,
    pub _padding: [u32; 2],
}

impl SceneUniform {
    pub fn empty() -> Self {
        let identity = glam::Mat4::IDENTITY.to_cols_array_2d();
        Self {
            camera: CameraUniform { view_proj: identity, inv_view_proj: identity, camera_pos: [0.0; 4] },
            lights: [LightUniform::default(); MAX_LIGHTS],
            model: identity,
            light_count: 0,
            time: 0.0,
            _padding: [0; 2],
        }
    }
}

/// `emissive.w` is the emissive intensity, `params` is
/// `[metalness, roughness, has_texture, 0]`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub base_color: [f32; 4],
    pub emissive: [f32; 4],
    pub params: [f32; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl ModelVertex {
    const ATTRIBS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2
    ];

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<ModelVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_sizes_match_wgsl_layout() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 144);
        assert_eq!(std::mem::size_of::<LightUniform>(), 32);
        assert_eq!(std::mem::size_of::<SceneUniform>(), 144 + 32 * MAX_LIGHTS + 64 + 16);
        assert_eq!(std::mem::size_of::<SceneUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<MaterialUniform>(), 48);
    }
}
