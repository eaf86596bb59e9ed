//! CPU-side model data: GLB parsing and the placeholder sphere.

use std::borrow::Cow;
use std::collections::HashMap;

use glam::{vec3, vec4, Mat3, Mat4, Quat, Vec3};

use crate::error::ViewerError;
use crate::material::MaterialParams;
use crate::uniforms::ModelVertex;

pub enum AssetMessage {
    Progress(f32),
    Loaded(ModelData),
    Failed(ViewerError),
    #[cfg(target_arch = "wasm32")]
    TextureLoaded {
        image_index: usize,
        texture: crate::gpu::Texture,
    },
}

#[derive(Clone, Debug)]
pub struct MeshData {
    pub vertices: Vec<ModelVertex>,
    pub indices: Vec<u32>,
    pub material: usize,
    pub blend: bool,
    pub aabb_min: Vec3,
    pub aabb_max: Vec3,
}

impl MeshData {
    pub fn center(&self) -> Vec3 {
        (self.aabb_min + self.aabb_max) * 0.5
    }
}

#[derive(Clone, Debug)]
pub struct MaterialData {
    pub name: Option<String>,
    pub params: MaterialParams,
    /// Index into [`ModelData::images`].
    pub base_color_image: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct EmbeddedImage {
    pub index: usize,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct ModelData {
    pub meshes: Vec<MeshData>,
    pub materials: Vec<MaterialData>,
    pub images: Vec<EmbeddedImage>,
    pub center: Vec3,
    /// Largest side of the bounding box.
    pub extent: f32,
}

const GLB_MAGIC: &[u8; 4] = b"glTF";
const REQUIRED_KEY: &[u8] = b"\"extensionsRequired\"";
const OPTIONAL_KEY: &[u8] = b"\"extensionsOptional\"";

/// Demotes `extensionsRequired` to `extensionsOptional` in a GLB's JSON
/// chunk. Unsupported extensions then degrade instead of failing the load.
pub fn relax_required_extensions(bytes: &[u8]) -> Cow<'_, [u8]> {
    if bytes.len() < 20 || &bytes[0..4] != GLB_MAGIC || &bytes[16..20] != b"JSON" {
        return Cow::Borrowed(bytes);
    }
    let json_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
    let Some(json) = bytes.get(20..20 + json_len) else {
        return Cow::Borrowed(bytes);
    };
    match json.windows(REQUIRED_KEY.len()).position(|w| w == REQUIRED_KEY) {
        Some(pos) => {
            let mut owned = bytes.to_vec();
            let start = 20 + pos;
            owned[start..start + OPTIONAL_KEY.len()].copy_from_slice(OPTIONAL_KEY);
            log::warn!("model declares required extensions; loading them as optional");
            Cow::Owned(owned)
        }
        None => Cow::Borrowed(bytes),
    }
}

fn material_data(material: &gltf::Material<'_>, images: &mut Vec<EmbeddedImage>, blob: &[u8]) -> MaterialData {
    let pbr = material.pbr_metallic_roughness();
    let [r, g, b, a] = pbr.base_color_factor();
    let params = MaterialParams {
        base_color: vec3(r, g, b),
        alpha: a,
        metalness: pbr.metallic_factor(),
        roughness: pbr.roughness_factor(),
        emissive: Vec3::from(material.emissive_factor()),
        emissive_intensity: material.emissive_strength().unwrap_or(1.0),
    };

    let base_color_image = pbr.base_color_texture().and_then(|info| {
        let image = info.texture().source();
        if let Some(existing) = images.iter().position(|e| e.index == image.index()) {
            return Some(existing);
        }
        match image.source() {
            gltf::image::Source::View { view, mime_type } => {
                let start = view.offset();
                let end = start + view.length();
                let bytes = blob.get(start..end)?.to_vec();
                images.push(EmbeddedImage { index: image.index(), mime_type: mime_type.to_string(), bytes });
                Some(images.len() - 1)
            }
            gltf::image::Source::Uri { uri, .. } => {
                log::warn!("skipping external texture {uri}");
                None
            }
        }
    });

    MaterialData { name: material.name().map(str::to_string), params, base_color_image }
}

impl ModelData {
    pub fn from_glb(bytes: &[u8]) -> Result<Self, ViewerError> {
        let bytes = relax_required_extensions(bytes);
        let gltf = gltf::Gltf::from_slice(&bytes)?;
        let document = gltf.document;
        let blob = gltf.blob.unwrap_or_default();

        let mut images = Vec::new();
        let mut materials: Vec<MaterialData> =
            document.materials().map(|m| material_data(&m, &mut images, &blob)).collect();
        let mut default_slot: Option<usize> = None;
        let mut meshes = Vec::new();

        for scene in document.scenes() {
            for node in scene.nodes() {
                let mut stack = vec![(node, Mat4::IDENTITY)];
                while let Some((node, parent_transform)) = stack.pop() {
                    let (t, r, s) = node.transform().decomposed();
                    let local = Mat4::from_scale_rotation_translation(Vec3::from(s), Quat::from_array(r), Vec3::from(t));
                    let world = parent_transform * local;
                    // normals take the inverse-transpose
                    let normal_matrix = Mat3::from_mat4(world).inverse().transpose();

                    if let Some(mesh) = node.mesh() {
                        for primitive in mesh.primitives() {
                            if !matches!(primitive.mode(), gltf::mesh::Mode::Triangles) {
                                log::debug!("skipping non-triangle primitive in mesh {:?}", mesh.name());
                                continue;
                            }
                            let reader = primitive.reader(|buffer| match buffer.source() {
                                gltf::buffer::Source::Bin => Some(blob.as_slice()),
                                _ => None,
                            });

                            let positions: Vec<[f32; 3]> = reader.read_positions().map(|i| i.collect()).unwrap_or_default();
                            if positions.is_empty() {
                                continue;
                            }
                            let normals: Vec<[f32; 3]> = reader.read_normals().map(|i| i.collect()).unwrap_or_else(|| vec![[0.0; 3]; positions.len()]);
                            let tex_coords: Vec<[f32; 2]> = reader.read_tex_coords(0).map(|v| v.into_f32().collect()).unwrap_or_else(|| vec![[0.0; 2]; positions.len()]);
                            let indices: Vec<u32> = reader.read_indices().map(|i| i.into_u32().collect()).unwrap_or_else(|| (0..positions.len() as u32).collect());

                            let mut min = Vec3::splat(f32::MAX);
                            let mut max = Vec3::splat(f32::MIN);
                            let vertices: Vec<ModelVertex> = positions
                                .iter()
                                .zip(normals.iter())
                                .zip(tex_coords.iter())
                                .map(|((p, n), uv)| {
                                    let pw = (world * vec4(p[0], p[1], p[2], 1.0)).truncate();
                                    min = min.min(pw);
                                    max = max.max(pw);
                                    let nw = (normal_matrix * Vec3::from(*n)).normalize_or_zero();
                                    ModelVertex { position: pw.to_array(), normal: nw.to_array(), tex_coord: *uv }
                                })
                                .collect();

                            let material = primitive.material();
                            let slot = match material.index() {
                                Some(index) => index,
                                None => *default_slot.get_or_insert_with(|| {
                                    materials.push(MaterialData { name: None, params: MaterialParams::default(), base_color_image: None });
                                    materials.len() - 1
                                }),
                            };

                            meshes.push(MeshData {
                                vertices,
                                indices,
                                material: slot,
                                blend: matches!(material.alpha_mode(), gltf::material::AlphaMode::Blend),
                                aabb_min: min,
                                aabb_max: max,
                            });
                        }
                    }
                    for child in node.children() {
                        stack.push((child, world));
                    }
                }
            }
        }

        if meshes.is_empty() {
            return Err(ViewerError::EmptyModel);
        }

        let (min, max) = meshes.iter().fold((Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)), |(lo, hi), m| {
            (lo.min(m.aabb_min), hi.max(m.aabb_max))
        });
        let size = max - min;

        Ok(ModelData {
            meshes,
            materials,
            images,
            center: (min + max) * 0.5,
            extent: size.max_element().max(f32::EPSILON),
        })
    }

    /// Material slots grouped by the image they sample, for texture swaps.
    pub fn materials_by_image(&self) -> HashMap<usize, Vec<usize>> {
        let mut map: HashMap<usize, Vec<usize>> = HashMap::new();
        for (slot, material) in self.materials.iter().enumerate() {
            if let Some(image) = material.base_color_image {
                map.entry(self.images[image].index).or_default().push(slot);
            }
        }
        map
    }
}

/// UV sphere shown while the real model loads.
pub fn sphere_mesh(radius: f32, segments: u32) -> MeshData {
    let mut vertices = Vec::with_capacity(((segments + 1) * (segments + 1)) as usize);
    let mut indices = Vec::with_capacity((segments * segments * 6) as usize);

    for i in 0..=segments {
        let theta = (i as f32 / segments as f32) * std::f32::consts::PI;
        let (sin_theta, cos_theta) = theta.sin_cos();
        for j in 0..=segments {
            let phi = (j as f32 / segments as f32) * 2.0 * std::f32::consts::PI;
            let (sin_phi, cos_phi) = phi.sin_cos();
            let normal = vec3(cos_phi * sin_theta, cos_theta, sin_phi * sin_theta);
            vertices.push(ModelVertex {
                position: (normal * radius).to_array(),
                normal: normal.to_array(),
                tex_coord: [j as f32 / segments as f32, i as f32 / segments as f32],
            });
        }
    }

    for i in 0..segments {
        for j in 0..segments {
            let first = i * (segments + 1) + j;
            let second = first + segments + 1;
            indices.extend_from_slice(&[first, second, first + 1, second, second + 1, first + 1]);
        }
    }

    MeshData {
        vertices,
        indices,
        material: 0,
        blend: false,
        aabb_min: Vec3::splat(-radius),
        aabb_max: Vec3::splat(radius),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Packs a JSON document and binary chunk into a GLB container.
    pub(crate) fn glb(json: &str, bin: &[u8]) -> Vec<u8> {
        let mut json = json.as_bytes().to_vec();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }
        let mut bin = bin.to_vec();
        while bin.len() % 4 != 0 {
            bin.push(0);
        }
        let total = 12 + 8 + json.len() + if bin.is_empty() { 0 } else { 8 + bin.len() };
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(b"JSON");
        out.extend_from_slice(&json);
        if !bin.is_empty() {
            out.extend_from_slice(&(bin.len() as u32).to_le_bytes());
            out.extend_from_slice(b"BIN\0");
            out.extend_from_slice(&bin);
        }
        out
    }

    pub(crate) fn triangle_bin() -> Vec<u8> {
        [[0.0f32, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
            .iter()
            .flat_map(|p| p.iter().flat_map(|c| c.to_le_bytes()))
            .collect()
    }

    pub(crate) fn triangle_json(extra: &str) -> String {
        format!(
            r#"{{
  "asset": {{"version": "2.0"}},
  {extra}
  "scene": 0,
  "scenes": [{{"nodes": [0]}}],
  "nodes": [{{"mesh": 0, "translation": [1.0, 0.0, 0.0]}}],
  "meshes": [{{"primitives": [{{"attributes": {{"POSITION": 0}}, "material": 0}}]}}],
  "materials": [{{"name": "navy", "pbrMetallicRoughness": {{"baseColorFactor": [0.1, 0.1, 0.45, 1.0], "metallicFactor": 0.7, "roughnessFactor": 0.2}}, "emissiveFactor": [0.2, 0.1, 0.0]}}],
  "buffers": [{{"byteLength": 36}}],
  "bufferViews": [{{"buffer": 0, "byteOffset": 0, "byteLength": 36}}],
  "accessors": [{{"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0.0, 0.0, 0.0], "max": [2.0, 1.0, 0.0]}}]
}}"#
        )
    }

    #[test]
    fn parses_triangle_in_world_space() {
        let model = ModelData::from_glb(&glb(&triangle_json(""), &triangle_bin())).unwrap();
        assert_eq!(model.meshes.len(), 1);
        let mesh = &model.meshes[0];
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.vertices[1].position, [3.0, 0.0, 0.0]);
        assert_eq!(mesh.vertices[0].normal, [0.0; 3]);
        assert!(!mesh.blend);
        assert_eq!(model.center, vec3(2.0, 0.5, 0.0));
        assert_eq!(model.extent, 2.0);

        let material = &model.materials[mesh.material];
        assert_eq!(material.name.as_deref(), Some("navy"));
        assert_eq!(material.params.base_color, vec3(0.1, 0.1, 0.45));
        assert_eq!(material.params.metalness, 0.7);
        assert_eq!(material.params.emissive_intensity, 1.0);
        assert!(material.base_color_image.is_none());
        assert!(model.materials_by_image().is_empty());
    }

    #[test]
    fn normals_survive_non_uniform_scale() {
        // position triangle followed by one normal per vertex, all along (1, 1, 0)
        let mut bin = triangle_bin();
        let n = std::f32::consts::FRAC_1_SQRT_2;
        bin.extend([[n, n, 0.0f32]; 3].iter().flat_map(|v| v.iter().flat_map(|c| c.to_le_bytes())));
        let json = r#"{
  "asset": {"version": "2.0"},
  "scene": 0,
  "scenes": [{"nodes": [0]}],
  "nodes": [{"mesh": 0, "scale": [2.0, 1.0, 1.0]}],
  "meshes": [{"primitives": [{"attributes": {"POSITION": 0, "NORMAL": 1}}]}],
  "buffers": [{"byteLength": 72}],
  "bufferViews": [{"buffer": 0, "byteOffset": 0, "byteLength": 36}, {"buffer": 0, "byteOffset": 36, "byteLength": 36}],
  "accessors": [
    {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3", "min": [0.0, 0.0, 0.0], "max": [2.0, 1.0, 0.0]},
    {"bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3"}
  ]
}"#;
        let model = ModelData::from_glb(&glb(json, &bin)).unwrap();
        let normal = Vec3::from(model.meshes[0].vertices[0].normal);
        // stretching x by 2 tilts the surface normal towards y: (0.5, 1, 0) normalized
        assert!((normal - vec3(0.5, 1.0, 0.0).normalize()).length() < 1e-5, "normal {normal}");
        assert!((normal.length() - 1.0).abs() < 1e-5);
        assert_eq!(model.meshes[0].vertices[1].position, [4.0, 0.0, 0.0]);
    }

    #[test]
    fn required_extensions_are_relaxed() {
        let bytes = glb(&triangle_json(r#""extensionsUsed": ["EXT_made_up"], "extensionsRequired": ["EXT_made_up"],"#), &triangle_bin());
        let relaxed = relax_required_extensions(&bytes);
        assert!(matches!(relaxed, Cow::Owned(_)));
        assert_eq!(relaxed.len(), bytes.len());
        assert!(ModelData::from_glb(&bytes).is_ok());

        let plain = glb(&triangle_json(""), &triangle_bin());
        assert!(matches!(relax_required_extensions(&plain), Cow::Borrowed(_)));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = ModelData::from_glb(b"<html>not found</html>").unwrap_err();
        assert!(matches!(err, ViewerError::Parse(_)));
    }

    #[test]
    fn model_without_primitives_is_rejected() {
        let json = r#"{"asset": {"version": "2.0"}, "scenes": [{"nodes": [0]}], "nodes": [{"name": "empty"}]}"#;
        let err = ModelData::from_glb(&glb(json, &[])).unwrap_err();
        assert!(matches!(err, ViewerError::EmptyModel));
    }

    #[test]
    fn sphere_is_closed_and_bounded() {
        let sphere = sphere_mesh(0.5, 8);
        assert_eq!(sphere.vertices.len(), 81);
        assert_eq!(sphere.indices.len(), 8 * 8 * 6);
        assert!(sphere.indices.iter().all(|&i| (i as usize) < sphere.vertices.len()));
        for v in &sphere.vertices {
            assert!((Vec3::from(v.position).length() - 0.5).abs() < 1e-5);
        }
        assert_eq!(sphere.center(), Vec3::ZERO);
    }
}
