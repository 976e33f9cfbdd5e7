//! Cached cloth geometry that replaces skinned results per agent part.

use std::collections::BTreeMap;
use std::sync::Arc;

use cgmath::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::attributes::AttributeValue;
use crate::common::Aabb;
use crate::instance::{ResolvedAgentInstance, ResolvedPart};
use crate::path::ScenePath;
use crate::source::{frame_for_time, ReaderOptions, SourceError};

/// Attribute carrying an entry's stack order on overridden parts.
pub const STACK_ORDER_ATTRIBUTE: &str = "atoms:clothStackOrder";

/// Simulated cloth for one agent part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClothEntry {
    pub positions: Vec<Point3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub bounding_box: Aabb,
    /// Compositing hint such as `"last"`. Does not affect geometry.
    pub stack_order: String,
}

impl ClothEntry {
    pub fn new(positions: Vec<Point3<f32>>, normals: Vec<Vector3<f32>>) -> Self {
        let bounding_box = Aabb::from_points(&positions).unwrap_or_default();
        Self {
            positions,
            normals,
            bounding_box,
            stack_order: "last".to_string(),
        }
    }

    pub fn with_stack_order(mut self, stack_order: impl Into<String>) -> Self {
        self.stack_order = stack_order.into();
        self
    }
}

/// Looks up cloth entries by exact `(agent id, part path)`.
pub trait ClothSource: Send + Sync {
    /// `part_path` is relative to the agent location.
    fn entry(&self, agent_id: i64, part_path: &ScenePath) -> Option<Arc<ClothEntry>>;

    fn has_agent(&self, agent_id: i64) -> bool;
}

/// Cloth entries of one frame: agent id → part path → entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClothCache {
    pub agents: BTreeMap<i64, BTreeMap<ScenePath, Arc<ClothEntry>>>,
}

impl ClothCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, agent_id: i64, part_path: ScenePath, entry: ClothEntry) {
        self.agents
            .entry(agent_id)
            .or_default()
            .insert(part_path, Arc::new(entry));
    }

    pub fn len(&self) -> usize {
        self.agents.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClothSource for ClothCache {
    fn entry(&self, agent_id: i64, part_path: &ScenePath) -> Option<Arc<ClothEntry>> {
        self.agents.get(&agent_id)?.get(part_path).cloned()
    }

    fn has_agent(&self, agent_id: i64) -> bool {
        self.agents.get(&agent_id).is_some_and(|parts| !parts.is_empty())
    }
}

/// Replaces the geometry of every part with a cloth entry.
///
/// Positions are taken from the entry as they are and the part bound becomes
/// the entry's bounding box. An entry whose point count does not match the
/// part's mesh is ignored with a warning. Entry normals replace the mesh's
/// only when both counts agree; otherwise the skinned normals stay.
pub fn apply_cloth(instance: &mut ResolvedAgentInstance, agent_id: i64, source: &dyn ClothSource) {
    if !source.has_agent(agent_id) {
        return;
    }
    for (name, part) in instance.parts.iter_mut() {
        apply_to_part(part, ScenePath::root().child(name.as_str()), agent_id, source);
    }
    instance.update_bound();
}

fn apply_to_part(part: &mut ResolvedPart, path: ScenePath, agent_id: i64, source: &dyn ClothSource) {
    for (name, child) in part.children.iter_mut() {
        apply_to_part(child, path.child(name.as_str()), agent_id, source);
    }

    let entry = match (source.entry(agent_id, &path), part.mesh.as_deref()) {
        (Some(entry), Some(mesh)) if entry.positions.len() == mesh.positions.len() => entry,
        (Some(entry), Some(mesh)) => {
            log::warn!(
                "Cloth entry for agent {} at {} has {} points, mesh has {}; ignored",
                agent_id,
                path,
                entry.positions.len(),
                mesh.positions.len()
            );
            part.update_bound();
            return;
        }
        _ => {
            part.update_bound();
            return;
        }
    };

    if let Some(mesh) = part.mesh.as_mut() {
        let mesh = Arc::make_mut(mesh);
        mesh.positions = entry.positions.clone();
        if entry.normals.len() == mesh.normals.len() {
            mesh.normals = entry.normals.clone();
        } else if !entry.normals.is_empty() {
            log::warn!(
                "Cloth entry for agent {} at {} has {} normals, mesh has {}; keeping skinned normals",
                agent_id,
                path,
                entry.normals.len(),
                mesh.normals.len()
            );
        }
    }
    part.attributes.insert(
        STACK_ORDER_ATTRIBUTE.to_string(),
        AttributeValue::String(entry.stack_order.clone()),
    );
    part.geometry_bound = if entry.bounding_box.is_empty() {
        Aabb::from_points(&entry.positions).unwrap_or_default()
    } else {
        entry.bounding_box
    };
    part.update_bound();
}

// ============================================================================
// Cloth Frames
// ============================================================================

/// Yields the cloth cache of one frame.
pub trait ClothFrameSource: Send + Sync {
    fn frame_range(&self) -> Result<Option<(i64, i64)>, SourceError>;

    fn frame(&self, frame: i64) -> Result<ClothCache, SourceError>;
}

/// Cloth caches for a range of frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClothFrames {
    pub frames: BTreeMap<i64, ClothCache>,
}

impl ClothFrameSource for ClothFrames {
    fn frame_range(&self) -> Result<Option<(i64, i64)>, SourceError> {
        let first = self.frames.keys().next().copied();
        let last = self.frames.keys().next_back().copied();
        Ok(first.zip(last))
    }

    fn frame(&self, frame: i64) -> Result<ClothCache, SourceError> {
        Ok(self.frames.get(&frame).cloned().unwrap_or_default())
    }
}

/// Reads the cloth cache at an evaluation time, shifted by the reader's
/// time offset and clamped to the cached frames.
pub struct ClothReader {
    source: Arc<dyn ClothFrameSource>,
    options: ReaderOptions,
}

impl ClothReader {
    pub fn new(source: Arc<dyn ClothFrameSource>, options: ReaderOptions) -> Self {
        Self { source, options }
    }

    /// A missing cache yields an empty result and a warning.
    pub fn read(&self, time: f64) -> ClothCache {
        let result = self.source.frame_range().and_then(|range| match range {
            Some(range) => self
                .source
                .frame(frame_for_time(time, self.options.time_offset, range)),
            None => Ok(ClothCache::new()),
        });
        result.unwrap_or_else(|err| {
            log::warn!("Cloth cache unavailable: {}; no cloth overrides applied", err);
            ClothCache::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(y: f32) -> ClothEntry {
        ClothEntry::new(vec![Point3::new(0.0, y, 0.0), Point3::new(1.0, y, 0.0)], Vec::new())
    }

    fn dressed(normals: Vec<Vector3<f32>>) -> ResolvedAgentInstance {
        use crate::mesh::Mesh;

        let mesh = Mesh::new(
            vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)],
            Vec::new(),
            Vec::new(),
        )
        .with_normals(vec![Vector3::unit_y(); 2]);
        let cape = ResolvedPart {
            transform: cgmath::SquareMatrix::identity(),
            mesh: Some(Arc::new(mesh)),
            attributes: Default::default(),
            geometry_bound: Aabb::default(),
            bound: Aabb::default(),
            children: BTreeMap::new(),
            error: None,
        };
        let mut instance = ResolvedAgentInstance {
            agent_type: "robot".into(),
            variation: "V1".into(),
            parts: BTreeMap::from([("cape".to_string(), cape)]),
            bound: Aabb::default(),
        };
        let mut cache = ClothCache::new();
        cache.insert(
            3,
            ScenePath::parse("/cape"),
            ClothEntry::new(vec![Point3::new(0.0, 4.0, 0.0), Point3::new(1.0, 4.0, 0.0)], normals),
        );
        apply_cloth(&mut instance, 3, &cache);
        instance
    }

    #[test]
    fn test_cloth_normals_need_matching_count() {
        let normals_of = |instance: &ResolvedAgentInstance| {
            instance.parts["cape"].mesh.as_ref().unwrap().normals.clone()
        };

        let kept = dressed(Vec::new());
        assert_eq!(kept.parts["cape"].mesh.as_ref().unwrap().positions[0].y, 4.0);
        assert_eq!(normals_of(&kept), vec![Vector3::unit_y(); 2]);

        let short = dressed(vec![Vector3::unit_x()]);
        assert_eq!(normals_of(&short), vec![Vector3::unit_y(); 2]);

        let replaced = dressed(vec![Vector3::unit_x(); 2]);
        assert_eq!(normals_of(&replaced), vec![Vector3::unit_x(); 2]);
        assert_eq!(replaced.bound.min.y, 4.0);
    }

    #[test]
    fn test_exact_lookup() {
        let mut cache = ClothCache::new();
        cache.insert(3, ScenePath::parse("/body/cape"), entry(1.0));

        assert!(cache.entry(3, &ScenePath::parse("/body/cape")).is_some());
        assert!(cache.entry(3, &ScenePath::parse("/body")).is_none());
        assert!(cache.entry(4, &ScenePath::parse("/body/cape")).is_none());
        assert!(cache.has_agent(3));
        assert!(!cache.has_agent(4));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_entry_bound() {
        let e = entry(2.0).with_stack_order("first");
        assert_eq!(e.bounding_box.min, Point3::new(0.0, 2.0, 0.0));
        assert_eq!(e.stack_order, "first");
    }

    #[test]
    fn test_reader_offsets_and_clamps() {
        let mut frames = ClothFrames::default();
        for frame in 1..=3 {
            let mut cache = ClothCache::new();
            cache.insert(frame, ScenePath::parse("/cape"), entry(frame as f32));
            frames.frames.insert(frame, cache);
        }
        let reader = ClothReader::new(
            Arc::new(frames),
            ReaderOptions::default().with_time_offset(1.0),
        );
        assert!(reader.read(1.0).has_agent(2));
        assert!(reader.read(40.0).has_agent(3));
        assert!(reader.read(-40.0).has_agent(1));
    }

    #[test]
    fn test_reader_missing_source() {
        struct Missing;
        impl ClothFrameSource for Missing {
            fn frame_range(&self) -> Result<Option<(i64, i64)>, SourceError> {
                Err(SourceError::Unavailable("gone".into()))
            }
            fn frame(&self, _frame: i64) -> Result<ClothCache, SourceError> {
                Err(SourceError::Unavailable("gone".into()))
            }
        }
        let reader = ClothReader::new(Arc::new(Missing), ReaderOptions::default());
        assert!(reader.read(1.0).is_empty());
    }
}
