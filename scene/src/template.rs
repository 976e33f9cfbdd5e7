//! Static agent geometry: part trees with skin bindings and declared sets.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use cgmath::{Matrix4, SquareMatrix};
use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeValue, Attributes};
use crate::mesh::Mesh;
use crate::path::ScenePath;
use crate::pose::BindingFault;

// ============================================================================
// Skin Binding
// ============================================================================

/// Variable-width joint influences, packed as a prefix-sum offset table over
/// flat index and weight arrays. Vertex `v` reads
/// `joint_indices[offsets[v]..offsets[v + 1]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkinBinding {
    offsets: Vec<u32>,
    joint_indices: Vec<u32>,
    joint_weights: Vec<f32>,
}

impl SkinBinding {
    /// Builds the binding from per-vertex counts. Consistency is checked
    /// later by [`SkinBinding::validate`], when the pose is known.
    pub fn from_counts(counts: &[u32], joint_indices: Vec<u32>, joint_weights: Vec<f32>) -> Self {
        let mut offsets = Vec::with_capacity(counts.len() + 1);
        let mut total = 0u32;
        offsets.push(0);
        for &count in counts {
            total = total.saturating_add(count);
            offsets.push(total);
        }
        Self {
            offsets,
            joint_indices,
            joint_weights,
        }
    }

    /// Every vertex bound fully to a single joint.
    pub fn rigid(vertex_count: usize, joint: u32) -> Self {
        Self::from_counts(&vec![1; vertex_count], vec![joint; vertex_count], vec![1.0; vertex_count])
    }

    pub fn vertex_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// True when no vertex has an influence.
    pub fn is_empty(&self) -> bool {
        self.offsets.last().copied().unwrap_or(0) == 0
    }

    pub fn counts(&self) -> Vec<u32> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Influences of one vertex. Call [`SkinBinding::validate`] first.
    pub fn influences(&self, vertex: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
        let start = self.offsets[vertex] as usize;
        let end = self.offsets[vertex + 1] as usize;
        self.joint_indices[start..end]
            .iter()
            .zip(&self.joint_weights[start..end])
            .map(|(&j, &w)| (j as usize, w))
    }

    /// Checks run lengths against the mesh and joint indices against the pose.
    pub fn validate(&self, vertex_count: usize, joint_count: usize) -> Result<(), BindingFault> {
        if self.vertex_count() != vertex_count {
            return Err(BindingFault::VertexCountMismatch {
                expected: vertex_count,
                found: self.vertex_count(),
            });
        }
        let total = self.offsets.last().copied().unwrap_or(0) as usize;
        if total > self.joint_indices.len() || total > self.joint_weights.len() {
            return Err(BindingFault::TruncatedRun {
                needed: total,
                indices: self.joint_indices.len(),
                weights: self.joint_weights.len(),
            });
        }
        if let Some(&bad) = self.joint_indices[..total]
            .iter()
            .find(|&&j| j as usize >= joint_count)
        {
            return Err(BindingFault::JointOutOfRange {
                joint: bad as usize,
                joint_count,
            });
        }
        Ok(())
    }

    /// The binding as the three flat attributes a variation source exposes.
    pub fn to_attributes(&self) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert(
            "jointIndexCount".into(),
            AttributeValue::IntArray(self.counts().into_iter().map(i64::from).collect()),
        );
        attributes.insert(
            "jointIndices".into(),
            AttributeValue::IntArray(self.joint_indices.iter().map(|&j| i64::from(j)).collect()),
        );
        attributes.insert(
            "jointWeights".into(),
            AttributeValue::FloatArray(self.joint_weights.clone()),
        );
        attributes
    }
}

// ============================================================================
// Template Parts
// ============================================================================

/// One named node of an agent template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplatePart {
    pub mesh: Option<Arc<Mesh>>,
    pub skin: Option<SkinBinding>,
    pub transform: Matrix4<f32>,
    pub attributes: Attributes,
    /// Set names declared on this part. They apply to every leaf below it.
    pub sets: BTreeSet<String>,
    pub children: BTreeMap<String, TemplatePart>,
}

impl Default for TemplatePart {
    fn default() -> Self {
        Self::group()
    }
}

impl TemplatePart {
    pub fn group() -> Self {
        Self {
            mesh: None,
            skin: None,
            transform: Matrix4::identity(),
            attributes: Attributes::new(),
            sets: BTreeSet::new(),
            children: BTreeMap::new(),
        }
    }

    pub fn mesh(mesh: Mesh) -> Self {
        Self {
            mesh: Some(Arc::new(mesh)),
            ..Self::group()
        }
    }

    pub fn with_skin(mut self, skin: SkinBinding) -> Self {
        self.skin = Some(skin);
        self
    }

    pub fn with_transform(mut self, transform: Matrix4<f32>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_set(mut self, name: impl Into<String>) -> Self {
        self.sets.insert(name.into());
        self
    }

    pub fn with_child(mut self, name: impl Into<String>, child: TemplatePart) -> Self {
        self.children.insert(name.into(), child);
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Static attributes plus the skin binding in flat form.
    pub fn declared_attributes(&self) -> Attributes {
        let mut attributes = self.attributes.clone();
        if let Some(skin) = &self.skin {
            attributes.extend(skin.to_attributes());
        }
        attributes
    }
}

// ============================================================================
// Agent Template
// ============================================================================

/// A leaf of a template with every set declared on it or its ancestors.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateLeaf {
    pub path: ScenePath,
    pub sets: BTreeSet<String>,
}

/// The static part tree of one agent type and variation.
#[derive(Debug)]
pub struct AgentTemplate {
    pub agent_type: String,
    pub variation: String,
    pub parts: BTreeMap<String, TemplatePart>,
    leaves: OnceLock<Vec<TemplateLeaf>>,
}

impl AgentTemplate {
    pub fn new(
        agent_type: impl Into<String>,
        variation: impl Into<String>,
        parts: BTreeMap<String, TemplatePart>,
    ) -> Self {
        Self {
            agent_type: agent_type.into(),
            variation: variation.into(),
            parts,
            leaves: OnceLock::new(),
        }
    }

    /// The part at a path relative to the agent. The empty path has no part.
    pub fn part(&self, path: &[String]) -> Option<&TemplatePart> {
        let (first, rest) = path.split_first()?;
        let mut part = self.parts.get(first)?;
        for name in rest {
            part = part.children.get(name)?;
        }
        Some(part)
    }

    /// Leaf parts in depth-first order, computed once.
    pub fn leaves(&self) -> &[TemplateLeaf] {
        self.leaves.get_or_init(|| {
            let mut leaves = Vec::new();
            for (name, part) in &self.parts {
                collect_leaves(part, ScenePath::root().child(name), &BTreeSet::new(), &mut leaves);
            }
            leaves
        })
    }

    /// Every set name declared anywhere in the template.
    pub fn declared_sets(&self) -> BTreeSet<String> {
        self.leaves()
            .iter()
            .flat_map(|leaf| leaf.sets.iter().cloned())
            .collect()
    }

    /// Depth-first visit of every part with its path.
    pub fn for_each_part(&self, mut f: impl FnMut(&ScenePath, &TemplatePart)) {
        fn visit(
            part: &TemplatePart,
            path: ScenePath,
            f: &mut dyn FnMut(&ScenePath, &TemplatePart),
        ) {
            f(&path, part);
            for (name, child) in &part.children {
                visit(child, path.child(name), f);
            }
        }
        for (name, part) in &self.parts {
            visit(part, ScenePath::root().child(name), &mut f);
        }
    }
}

fn collect_leaves(
    part: &TemplatePart,
    path: ScenePath,
    inherited: &BTreeSet<String>,
    out: &mut Vec<TemplateLeaf>,
) {
    let sets: BTreeSet<String> = inherited.union(&part.sets).cloned().collect();
    if part.is_leaf() {
        out.push(TemplateLeaf { path, sets });
        return;
    }
    for (name, child) in &part.children {
        collect_leaves(child, path.child(name), &sets, out);
    }
}
