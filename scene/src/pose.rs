//! Linear blend skinning and blend-shape interpolation of template parts.

use std::collections::BTreeMap;
use std::hash::Hasher;

use cgmath::{EuclideanSpace, Matrix4, Point3, Vector3, Zero};
use thiserror::Error;

use crate::agent::AgentRecord;
use crate::attributes::{hash_floats, Attributes};
use crate::common::transform_ops::{normal_matrix, normalize_or_zero, transform_direction, transform_point};
use crate::mesh::Mesh;
use crate::path::ScenePath;
use crate::points::CrowdPoints;
use crate::template::{AgentTemplate, SkinBinding};

/// Blend weights below this are treated as zero.
pub const MIN_BLEND_WEIGHT: f32 = 1e-5;

// ============================================================================
// Errors
// ============================================================================

/// What is wrong with a part's joint/weight runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindingFault {
    #[error("binding covers {found} vertices, mesh has {expected}")]
    VertexCountMismatch { expected: usize, found: usize },

    #[error("runs need {needed} entries, found {indices} indices and {weights} weights")]
    TruncatedRun {
        needed: usize,
        indices: usize,
        weights: usize,
    },

    #[error("joint index {joint} out of range for {joint_count} joints")]
    JointOutOfRange { joint: usize, joint_count: usize },

    #[error("face vertex {vertex} out of range for {vertex_count} vertices")]
    VertexIdOutOfRange { vertex: usize, vertex_count: usize },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SkinningError {
    #[error("Malformed skin binding on {part}: {fault}")]
    MalformedSkinBinding { part: ScenePath, fault: BindingFault },
}

// ============================================================================
// Blend Weights
// ============================================================================

/// Where per-agent blend-shape weights come from.
///
/// Weight `i` of part `name` for an agent of type `T` is looked up as the
/// point variable `atoms:T_name_i`, then the record metadata `T_name_i`,
/// and falls back to `default_weight`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlendWeightConfig {
    pub from_point_variables: bool,
    pub from_metadata: bool,
    pub default_weight: f32,
}

impl Default for BlendWeightConfig {
    fn default() -> Self {
        Self {
            from_point_variables: true,
            from_metadata: true,
            default_weight: 0.0,
        }
    }
}

impl BlendWeightConfig {
    /// Every blend shape stays at `weight`, ignoring per-agent data.
    pub fn fixed(weight: f32) -> Self {
        Self {
            from_point_variables: false,
            from_metadata: false,
            default_weight: weight,
        }
    }

    pub fn weight_key(agent_type: &str, part_name: &str, index: usize) -> String {
        format!("{}_{}_{}", agent_type, part_name, index)
    }

    pub fn weight(
        &self,
        key: &str,
        points: &CrowdPoints,
        point_index: Option<usize>,
        metadata: &Attributes,
    ) -> f32 {
        if self.from_point_variables {
            if let Some(value) = point_index
                .and_then(|i| points.value(&format!("atoms:{}", key), i))
                .and_then(|v| v.as_f64())
            {
                return value as f32;
            }
        }
        if self.from_metadata {
            if let Some(value) = metadata.get(key).and_then(|v| v.as_f64()) {
                return value as f32;
            }
        }
        self.default_weight
    }

    /// Weights for every part of `template` that carries blend shapes.
    pub fn resolve(
        &self,
        template: &AgentTemplate,
        record: &AgentRecord,
        points: &CrowdPoints,
        point_index: Option<usize>,
    ) -> BlendWeights {
        let mut weights = BTreeMap::new();
        template.for_each_part(|path, part| {
            let Some(mesh) = &part.mesh else { return };
            if mesh.blend_shapes.is_empty() {
                return;
            }
            let name = path.name().unwrap_or_default();
            let values = (0..mesh.blend_shapes.len())
                .map(|i| {
                    let key = Self::weight_key(&record.agent_type, name, i);
                    self.weight(&key, points, point_index, &record.metadata)
                })
                .collect();
            weights.insert(path.clone(), values);
        });
        BlendWeights(weights)
    }
}

/// Resolved blend weights of one agent, per part path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlendWeights(BTreeMap<ScenePath, Vec<f32>>);

impl BlendWeights {
    pub fn for_part(&self, path: &ScenePath) -> &[f32] {
        self.0.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn hash_into<H: Hasher>(&self, state: &mut H) {
        for (path, values) in &self.0 {
            std::hash::Hash::hash(path, state);
            hash_floats(values, state);
        }
    }
}

// ============================================================================
// Deformation
// ============================================================================

/// Per-joint matrices of one agent.
#[derive(Debug, Clone, Copy)]
pub struct JointPoses<'a> {
    pub world: &'a [Matrix4<f32>],
    /// One per joint, or empty to derive them from `world`.
    pub normal: &'a [Matrix4<f32>],
}

impl<'a> JointPoses<'a> {
    pub fn of(record: &'a AgentRecord) -> Self {
        Self {
            world: &record.joint_world_poses,
            normal: &record.joint_normal_poses,
        }
    }
}

/// Deformed mesh per mesh-carrying part, or the reason the part failed.
pub type DeformedParts = BTreeMap<ScenePath, Result<Mesh, SkinningError>>;

/// Deforms every mesh part of `template`. A malformed binding fails only its
/// own part.
pub fn deform(template: &AgentTemplate, poses: &JointPoses, weights: &BlendWeights) -> DeformedParts {
    let mut deformed = DeformedParts::new();
    template.for_each_part(|path, part| {
        let Some(mesh) = &part.mesh else { return };
        let result = deform_mesh(mesh, part.skin.as_ref(), poses, weights.for_part(path))
            .map_err(|fault| SkinningError::MalformedSkinBinding {
                part: path.clone(),
                fault,
            });
        deformed.insert(path.clone(), result);
    });
    deformed
}

/// Blends then skins one mesh.
///
/// Without a binding, or with a binding that has no influences, the blended
/// rest mesh is returned. Vertices without influences keep their rest
/// position. Weights are used as given.
pub fn deform_mesh(
    mesh: &Mesh,
    skin: Option<&SkinBinding>,
    poses: &JointPoses,
    blend_weights: &[f32],
) -> Result<Mesh, BindingFault> {
    let mut out = mesh.clone();
    apply_blend_shapes(&mut out, blend_weights);

    let Some(skin) = skin.filter(|s| !s.is_empty()) else {
        return Ok(out);
    };

    if poses.world.is_empty() {
        log::warn!("No joint poses for a skinned part; using the rest mesh");
        return Ok(out);
    }

    skin.validate(mesh.num_vertices(), poses.world.len())?;
    if let Some(&bad) = mesh
        .vertex_ids
        .iter()
        .find(|&&v| v as usize >= mesh.num_vertices())
    {
        return Err(BindingFault::VertexIdOutOfRange {
            vertex: bad as usize,
            vertex_count: mesh.num_vertices(),
        });
    }

    let derived;
    let normal_poses = if poses.normal.len() == poses.world.len() {
        poses.normal
    } else {
        derived = poses.world.iter().map(normal_matrix).collect::<Vec<_>>();
        derived.as_slice()
    };

    let rest_positions = out.positions.clone();
    for (v, position) in out.positions.iter_mut().enumerate() {
        let mut acc = Vector3::zero();
        let mut influenced = false;
        for (joint, weight) in skin.influences(v) {
            acc += transform_point(&poses.world[joint], rest_positions[v]).to_vec() * weight;
            influenced = true;
        }
        if influenced {
            *position = Point3::from_vec(acc);
        }
    }

    for i in 0..out.normals.len() {
        let Some(v) = out.normal_vertex(i) else { continue };
        let mut acc = Vector3::zero();
        let mut influenced = false;
        for (joint, weight) in skin.influences(v) {
            acc += transform_direction(&normal_poses[joint], out.normals[i]) * weight;
            influenced = true;
        }
        if influenced {
            out.normals[i] = normalize_or_zero(acc);
        }
    }

    Ok(out)
}

/// `p += Σ w·(target − rest)`; normals average `n·(1−w) + target·w` over the
/// active targets. Consumes the blend-shape arrays.
fn apply_blend_shapes(mesh: &mut Mesh, weights: &[f32]) {
    let shapes = std::mem::take(&mut mesh.blend_shapes);
    let active: Vec<(usize, f32)> = weights
        .iter()
        .copied()
        .enumerate()
        .filter(|&(i, w)| {
            w >= MIN_BLEND_WEIGHT
                && shapes
                    .get(i)
                    .is_some_and(|s| s.positions.len() == mesh.positions.len())
        })
        .collect();
    if active.is_empty() {
        return;
    }

    let rest_positions = mesh.positions.clone();
    for &(i, w) in &active {
        for (p, (target, rest)) in mesh
            .positions
            .iter_mut()
            .zip(shapes[i].positions.iter().zip(&rest_positions))
        {
            *p += (*target - *rest) * w;
        }
    }

    let with_normals: Vec<(usize, f32)> = active
        .into_iter()
        .filter(|&(i, _)| !mesh.normals.is_empty() && shapes[i].normals.len() == mesh.normals.len())
        .collect();
    if with_normals.is_empty() {
        return;
    }
    let count = with_normals.len() as f32;
    for (k, normal) in mesh.normals.iter_mut().enumerate() {
        let sum = with_normals.iter().fold(Vector3::zero(), |acc, &(i, w)| {
            acc + *normal * (1.0 - w) + shapes[i].normals[k] * w
        });
        *normal = normalize_or_zero(sum / count);
    }
}
