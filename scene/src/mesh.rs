use std::sync::Arc;

use cgmath::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::common::Aabb;
use crate::points::CrowdPoints;

/// One blend-shape target, parallel to the mesh it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendShape {
    pub positions: Vec<Point3<f32>>,
    /// Same interpolation as the owning mesh's normals. May be empty.
    pub normals: Vec<Vector3<f32>>,
}

/// Polygon mesh geometry.
///
/// Topology is `verts_per_face` + `vertex_ids`. Normals and UVs are either
/// face-varying (one per entry of `vertex_ids`) or per-vertex (one per
/// position).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub positions: Vec<Point3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub uvs: Vec<[f32; 2]>,
    pub verts_per_face: Vec<u32>,
    pub vertex_ids: Vec<u32>,
    pub blend_shapes: Vec<BlendShape>,
    /// Rest positions, kept through deformation when requested.
    pub pref: Option<Vec<Point3<f32>>>,
    /// Rest normals, kept through deformation when requested.
    pub nref: Option<Vec<Vector3<f32>>>,
}

impl Mesh {
    pub fn new(positions: Vec<Point3<f32>>, verts_per_face: Vec<u32>, vertex_ids: Vec<u32>) -> Self {
        Self {
            positions,
            verts_per_face,
            vertex_ids,
            ..Default::default()
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vector3<f32>>) -> Self {
        self.normals = normals;
        self
    }

    pub fn with_uvs(mut self, uvs: Vec<[f32; 2]>) -> Self {
        self.uvs = uvs;
        self
    }

    pub fn with_blend_shape(mut self, shape: BlendShape) -> Self {
        self.blend_shapes.push(shape);
        self
    }

    pub fn num_vertices(&self) -> usize {
        self.positions.len()
    }

    pub fn num_faces(&self) -> usize {
        self.verts_per_face.len()
    }

    pub fn normals_are_face_varying(&self) -> bool {
        !self.normals.is_empty()
            && self.normals.len() == self.vertex_ids.len()
            && self.normals.len() != self.positions.len()
    }

    /// Index of the position that normal `i` belongs to.
    pub fn normal_vertex(&self, i: usize) -> Option<usize> {
        if self.normals_are_face_varying() {
            self.vertex_ids.get(i).map(|&v| v as usize)
        } else if i < self.positions.len() {
            Some(i)
        } else {
            None
        }
    }

    pub fn bound(&self) -> Aabb {
        Aabb::from_points(&self.positions).unwrap_or_default()
    }

    /// Copies rest positions and normals into `pref`/`nref`.
    pub fn store_rest(&mut self, positions: bool, normals: bool) {
        if positions {
            self.pref = Some(self.positions.clone());
        }
        if normals {
            self.nref = Some(self.normals.clone());
        }
    }
}

/// Geometry carried by a hierarchy location.
#[derive(Debug, Clone)]
pub enum SceneObject {
    Mesh(Arc<Mesh>),
    Points(Arc<CrowdPoints>),
}

impl SceneObject {
    pub fn as_mesh(&self) -> Option<&Mesh> {
        match self {
            Self::Mesh(mesh) => Some(mesh),
            Self::Points(_) => None,
        }
    }

    pub fn as_points(&self) -> Option<&CrowdPoints> {
        match self {
            Self::Points(points) => Some(points),
            Self::Mesh(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Mesh {
        Mesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![3],
            vec![0, 1, 2],
        )
    }

    #[test]
    fn test_normal_vertex_per_vertex() {
        let mesh = triangle().with_normals(vec![Vector3::unit_z(); 3]);
        assert!(!mesh.normals_are_face_varying());
        assert_eq!(mesh.normal_vertex(2), Some(2));
        assert_eq!(mesh.normal_vertex(3), None);
    }

    #[test]
    fn test_normal_vertex_face_varying() {
        // Two triangles sharing an edge: 4 points, 6 face-vertices.
        let mesh = Mesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
            ],
            vec![3, 3],
            vec![0, 1, 2, 2, 1, 3],
        )
        .with_normals(vec![Vector3::unit_z(); 6]);

        assert!(mesh.normals_are_face_varying());
        assert_eq!(mesh.normal_vertex(5), Some(3));
        assert_eq!(mesh.normal_vertex(3), Some(2));
    }

    #[test]
    fn test_bound() {
        let bound = triangle().bound();
        assert_eq!(bound.min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(bound.max, Point3::new(1.0, 1.0, 0.0));
        assert!(Mesh::default().bound().is_empty());
    }

    #[test]
    fn test_store_rest() {
        let mut mesh = triangle();
        mesh.store_rest(true, false);
        assert_eq!(mesh.pref.as_ref().map(Vec::len), Some(3));
        assert!(mesh.nref.is_none());
    }
}
