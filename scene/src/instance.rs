//! Deformed agents and the fingerprints that let agents share them.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use cgmath::Matrix4;

use crate::agent::AgentRecord;
use crate::attributes::{hash_floats, strip_skin_attributes, Attributes};
use crate::cache::KeyedCache;
use crate::common::Aabb;
use crate::mesh::Mesh;
use crate::path::ScenePath;
use crate::pose::{self, BlendWeights, DeformedParts, JointPoses, SkinningError};
use crate::template::{AgentTemplate, TemplatePart};

/// Cache of resolved instances, owned by the caller of an expansion.
pub type InstanceCache = KeyedCache<InstanceFingerprint, Arc<ResolvedAgentInstance>>;

/// Content hash identifying the deformed geometry of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceFingerprint(pub u64);

impl InstanceFingerprint {
    /// Hashes everything the deformed geometry depends on: the resolved
    /// template, both pose arrays, the blend weights and the library's
    /// [`content_key`](crate::library::TemplateLibrary::content_key).
    /// `agent_id` is mixed in when the instance must not be
    /// shared (instancing disabled, or per-agent cloth).
    pub fn compute(
        template: &AgentTemplate,
        record: &AgentRecord,
        weights: &BlendWeights,
        library_key: u64,
        agent_id: Option<i64>,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        template.agent_type.hash(&mut hasher);
        template.variation.hash(&mut hasher);
        hash_matrices(&record.joint_world_poses, &mut hasher);
        hash_matrices(&record.joint_normal_poses, &mut hasher);
        weights.hash_into(&mut hasher);
        library_key.hash(&mut hasher);
        agent_id.hash(&mut hasher);
        Self(hasher.finish())
    }
}

fn hash_matrices<H: Hasher>(matrices: &[Matrix4<f32>], state: &mut H) {
    matrices.len().hash(state);
    for m in matrices {
        let values: &[f32; 16] = m.as_ref();
        hash_floats(values, state);
    }
}

// ============================================================================
// Resolved Geometry
// ============================================================================

/// One part of a resolved agent, mirroring a template part.
#[derive(Debug, Clone)]
pub struct ResolvedPart {
    pub transform: Matrix4<f32>,
    /// Deformed (or cloth) mesh. `None` for groups and failed parts.
    pub mesh: Option<Arc<Mesh>>,
    /// Template attributes without the skin binding entries.
    pub attributes: Attributes,
    /// Bound of this part's own mesh.
    pub geometry_bound: Aabb,
    /// Bound of the mesh and every child, in this part's space.
    pub bound: Aabb,
    pub children: BTreeMap<String, ResolvedPart>,
    /// Why the part has no mesh although the template has one.
    pub error: Option<SkinningError>,
}

impl ResolvedPart {
    /// Recomputes `bound` from `geometry_bound` and the children's bounds.
    pub fn update_bound(&mut self) {
        self.bound = self.children.values().fold(self.geometry_bound, |bound, child| {
            bound.merge(&child.bound.transform(&child.transform))
        });
    }
}

/// An agent's template with every mesh deformed by its pose.
#[derive(Debug, Clone)]
pub struct ResolvedAgentInstance {
    pub agent_type: String,
    pub variation: String,
    pub parts: BTreeMap<String, ResolvedPart>,
    pub bound: Aabb,
}

impl ResolvedAgentInstance {
    pub fn part(&self, path: &[String]) -> Option<&ResolvedPart> {
        let (first, rest) = path.split_first()?;
        let mut part = self.parts.get(first)?;
        for name in rest {
            part = part.children.get(name)?;
        }
        Some(part)
    }

    pub fn update_bound(&mut self) {
        self.bound = self.parts.values().fold(Aabb::empty(), |bound, part| {
            bound.merge(&part.bound.transform(&part.transform))
        });
    }
}

/// Deforms `template` with `record`'s pose. Parts whose binding is malformed
/// keep their place with no mesh.
pub fn resolve_instance(
    template: &AgentTemplate,
    record: &AgentRecord,
    weights: &BlendWeights,
) -> ResolvedAgentInstance {
    let mut deformed = pose::deform(template, &JointPoses::of(record), weights);
    let parts = template
        .parts
        .iter()
        .map(|(name, part)| {
            let path = ScenePath::root().child(name.as_str());
            (name.clone(), resolve_part(part, path, &mut deformed, record.agent_id))
        })
        .collect();

    let mut instance = ResolvedAgentInstance {
        agent_type: template.agent_type.clone(),
        variation: template.variation.clone(),
        parts,
        bound: Aabb::empty(),
    };
    instance.update_bound();
    instance
}

fn resolve_part(
    part: &TemplatePart,
    path: ScenePath,
    deformed: &mut DeformedParts,
    agent_id: i64,
) -> ResolvedPart {
    let children = part
        .children
        .iter()
        .map(|(name, child)| {
            let child_path = path.child(name.as_str());
            (name.clone(), resolve_part(child, child_path, deformed, agent_id))
        })
        .collect();

    let (mesh, error) = match deformed.remove(&path) {
        Some(Ok(mesh)) => (Some(Arc::new(mesh)), None),
        Some(Err(err)) => {
            log::error!("Agent {}: {}; part omitted", agent_id, err);
            (None, Some(err))
        }
        None => (None, None),
    };

    let mut resolved = ResolvedPart {
        transform: part.transform,
        geometry_bound: mesh.as_deref().map(Mesh::bound).unwrap_or_default(),
        mesh,
        attributes: strip_skin_attributes(&part.attributes),
        bound: Aabb::empty(),
        children,
        error,
    };
    resolved.update_bound();
    resolved
}
