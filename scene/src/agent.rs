use std::collections::BTreeMap;
use std::sync::Arc;

use cgmath::{EuclideanSpace, Matrix4, Point3, SquareMatrix};
use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeValue, Attributes};
use crate::common::{transform_ops, Aabb};
use crate::points::{self, CrowdPoints, PointVariable};

/// One simulated agent at one evaluated time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: i64,
    pub agent_type: String,
    pub variation: String,
    /// Level-of-detail suffix; empty for none.
    pub lod: String,
    pub root_transform: Matrix4<f32>,
    pub joint_world_poses: Vec<Matrix4<f32>>,
    pub joint_normal_poses: Vec<Matrix4<f32>>,
    /// Agent-space bounds.
    pub bounding_box: Aabb,
    pub metadata: Attributes,
}

impl AgentRecord {
    pub fn new(agent_id: i64, agent_type: impl Into<String>, variation: impl Into<String>) -> Self {
        Self {
            agent_id,
            agent_type: agent_type.into(),
            variation: variation.into(),
            lod: String::new(),
            root_transform: Matrix4::identity(),
            joint_world_poses: Vec::new(),
            joint_normal_poses: Vec::new(),
            bounding_box: Aabb::empty(),
            metadata: Attributes::new(),
        }
    }

    pub fn with_lod(mut self, lod: impl Into<String>) -> Self {
        self.lod = lod.into();
        self
    }

    pub fn with_root_transform(mut self, root_transform: Matrix4<f32>) -> Self {
        self.root_transform = root_transform;
        self
    }

    pub fn with_poses(mut self, world: Vec<Matrix4<f32>>, normal: Vec<Matrix4<f32>>) -> Self {
        self.joint_world_poses = world;
        self.joint_normal_poses = normal;
        self
    }

    pub fn with_bounding_box(mut self, bounding_box: Aabb) -> Self {
        self.bounding_box = bounding_box;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn position(&self) -> Point3<f32> {
        Point3::from_vec(transform_ops::translation_of(&self.root_transform))
    }
}

/// Variation name as it appears in paths: `variation` or `variation:lod`.
pub fn variation_key(variation: &str, lod: &str) -> String {
    if lod.is_empty() {
        variation.to_string()
    } else {
        format!("{}:{}", variation, lod)
    }
}

/// One evaluated frame of a crowd: the points primitive plus the full
/// per-agent records it was built from.
#[derive(Debug, Clone, Default)]
pub struct Crowd {
    pub points: Arc<CrowdPoints>,
    pub agents: BTreeMap<i64, AgentRecord>,
}

impl Crowd {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the points primitive in record order. A repeated agent id keeps
    /// its first record.
    pub fn from_records(records: impl IntoIterator<Item = AgentRecord>) -> Self {
        let mut agents = BTreeMap::new();
        let mut order = Vec::new();
        for record in records {
            if agents.contains_key(&record.agent_id) {
                log::warn!("Duplicate agent id {} ignored", record.agent_id);
                continue;
            }
            order.push(record.agent_id);
            agents.insert(record.agent_id, record);
        }

        let ordered: Vec<&AgentRecord> = order.iter().filter_map(|id| agents.get(id)).collect();
        let mut points = CrowdPoints::new(ordered.iter().map(|r| r.position()).collect());
        points.insert_variable(
            points::AGENT_ID,
            PointVariable::Int(ordered.iter().map(|r| r.agent_id).collect()),
        );
        points.insert_variable(
            points::AGENT_TYPE,
            PointVariable::String(ordered.iter().map(|r| r.agent_type.clone()).collect()),
        );
        points.insert_variable(
            points::VARIATION,
            PointVariable::String(ordered.iter().map(|r| r.variation.clone()).collect()),
        );
        points.insert_variable(
            points::LOD,
            PointVariable::String(ordered.iter().map(|r| r.lod.clone()).collect()),
        );
        points.insert_variable(
            points::POSITION,
            PointVariable::Vector3(
                ordered
                    .iter()
                    .map(|r| transform_ops::translation_of(&r.root_transform))
                    .collect(),
            ),
        );

        Self {
            points: Arc::new(points),
            agents,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn with_points(&self, points: CrowdPoints) -> Self {
        Self {
            points: Arc::new(points),
            agents: self.agents.clone(),
        }
    }
}
