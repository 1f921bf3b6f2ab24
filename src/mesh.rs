// Mesh data - vertex layout and model loading
//
// Meshes are loaded on the CPU before any Vulkan object exists; the renderer
// only ever sees the final de-duplicated vertex and index arrays.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader};
use std::mem::{offset_of, size_of};
use std::path::Path;

/// Interleaved vertex: position, color, texture coordinate
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self { pos, color, tex_coord }
    }

    fn bits(&self) -> [u32; 8] {
        let [px, py, pz] = self.pos;
        let [r, g, b] = self.color;
        let [u, v] = self.tex_coord;
        [px, py, pz, r, g, b, u, v].map(f32::to_bits)
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Vertex, pos) as u32)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(offset_of!(Vertex, color) as u32)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(2)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(offset_of!(Vertex, tex_coord) as u32)
                .build(),
        ]
    }
}

// Compared bit-for-bit so vertices can key a HashMap
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// Indexed triangle list
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

const WHITE: [f32; 3] = [1.0, 1.0, 1.0];

impl Mesh {
    /// Load a Wavefront OBJ file
    pub fn load_obj<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open model {:?}", path))?;
        let mut reader = BufReader::new(file);

        let mesh = Self::from_obj_reader(&mut reader)
            .with_context(|| format!("Failed to load model {:?}", path))?;

        log::info!(
            "Loaded model {:?}: {} vertices, {} indices",
            path,
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(mesh)
    }

    /// Parse OBJ data, triangulating faces and merging identical vertices
    /// across every object in the file.
    pub fn from_obj_reader<R: BufRead>(reader: &mut R) -> Result<Self> {
        let (models, _materials) = tobj::load_obj_buf(
            reader,
            &tobj::LoadOptions {
                triangulate: true,
                single_index: true,
                ..Default::default()
            },
            // Materials are ignored, the texture comes from the config
            |_| Ok(Default::default()),
        )?;

        let mut mesh = Mesh::default();
        let mut unique_vertices: HashMap<Vertex, u32> = HashMap::new();

        for model in &models {
            let positions = &model.mesh.positions;
            let texcoords = &model.mesh.texcoords;

            for &index in &model.mesh.indices {
                let i = index as usize;
                let pos = [positions[3 * i], positions[3 * i + 1], positions[3 * i + 2]];

                // OBJ puts v=0 at the bottom of the image, Vulkan at the top
                let tex_coord = if texcoords.len() >= 2 * i + 2 {
                    [texcoords[2 * i], 1.0 - texcoords[2 * i + 1]]
                } else {
                    [0.0, 0.0]
                };

                let vertex = Vertex::new(pos, WHITE, tex_coord);

                let next_index = mesh.vertices.len() as u32;
                let index = *unique_vertices.entry(vertex).or_insert_with(|| {
                    mesh.vertices.push(vertex);
                    next_index
                });
                mesh.indices.push(index);
            }
        }

        if mesh.indices.is_empty() {
            anyhow::bail!("Model contains no triangles");
        }

        Ok(mesh)
    }

    /// Two stacked textured quads, shown when no model file is available
    pub fn quads() -> Self {
        let vertices = vec![
            Vertex::new([-0.5, -0.5, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0]),
            Vertex::new([0.5, -0.5, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0]),
            Vertex::new([0.5, 0.5, 0.0], [0.0, 0.0, 1.0], [1.0, 1.0]),
            Vertex::new([-0.5, 0.5, 0.0], WHITE, [0.0, 1.0]),
            Vertex::new([-0.5, -0.5, -0.5], [1.0, 0.0, 0.0], [0.0, 0.0]),
            Vertex::new([0.5, -0.5, -0.5], [0.0, 1.0, 0.0], [1.0, 0.0]),
            Vertex::new([0.5, 0.5, -0.5], [0.0, 0.0, 1.0], [1.0, 1.0]),
            Vertex::new([-0.5, 0.5, -0.5], WHITE, [0.0, 1.0]),
        ];
        let indices = vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4];

        Self { vertices, indices }
    }

    /// Model file if present, built-in quads otherwise
    pub fn load_or_quads<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_obj(path)
        } else {
            log::warn!("Model {:?} not found, showing built-in quads", path);
            Ok(Self::quads())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(obj: &str) -> Result<Mesh> {
        Mesh::from_obj_reader(&mut Cursor::new(obj.as_bytes()))
    }

    const TEXTURED_SQUARE: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
f 1/1 2/2 3/3
f 1/1 3/3 4/4
";

    #[test]
    fn shared_corners_are_reused() {
        let mesh = parse(TEXTURED_SQUARE).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn texture_v_is_flipped() {
        let mesh = parse(TEXTURED_SQUARE).unwrap();
        assert_eq!(mesh.vertices[0].tex_coord, [0.0, 1.0]);
        assert_eq!(mesh.vertices[2].tex_coord, [1.0, 0.0]);
        assert!(mesh.vertices.iter().all(|v| v.color == WHITE));
    }

    #[test]
    fn identical_vertices_merge_across_objects() {
        let obj = "\
o first
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
o second
v 0 0 0
v 1 0 0
v 0 1 0
f 4 5 6
";
        let mesh = parse(obj).unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn polygons_are_triangulated() {
        let obj = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
f 1 2 3 4
";
        let mesh = parse(obj).unwrap();
        assert_eq!(mesh.indices.len(), 6);
        assert_eq!(mesh.vertices.len(), 4);
    }

    #[test]
    fn missing_texcoords_default_to_origin() {
        let obj = "\
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
";
        let mesh = parse(obj).unwrap();
        assert!(mesh.vertices.iter().all(|v| v.tex_coord == [0.0, 0.0]));
    }

    #[test]
    fn file_without_faces_is_rejected() {
        assert!(parse("v 0 0 0\nv 1 0 0\n").is_err());
    }

    #[test]
    fn builtin_quads_index_existing_vertices() {
        let mesh = Mesh::quads();
        assert_eq!(mesh.indices.len(), 12);
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.vertices.len()));
    }

    #[test]
    fn missing_model_falls_back_to_quads() {
        let mesh = Mesh::load_or_quads("no/such/model.obj").unwrap();
        assert_eq!(mesh.vertices.len(), Mesh::quads().vertices.len());
    }

    #[test]
    fn attribute_offsets_match_layout() {
        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[2].offset, 24);
        assert_eq!(Vertex::binding_description().stride, 32);
    }

    #[test]
    fn negative_zero_is_a_distinct_vertex() {
        let a = Vertex::new([0.0, 0.0, 0.0], WHITE, [0.0, 0.0]);
        let b = Vertex::new([-0.0, 0.0, 0.0], WHITE, [0.0, 0.0]);
        assert_ne!(a, b);
    }
}
