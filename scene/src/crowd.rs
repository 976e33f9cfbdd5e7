//! Crowd expansion: per-agent records plus agent templates, exposed as a
//! lazy hierarchy
//! `<destination>/<name>/<agentType>/<variation>/<agentId>/<part...>`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};

use cgmath::{Matrix4, SquareMatrix};
use rayon::prelude::*;

use crate::agent::{variation_key, AgentRecord, Crowd};
use crate::attributes::{strip_skin_attributes, AttributeValue, Attributes};
use crate::cloth::{apply_cloth, ClothSource};
use crate::common::{transform_ops, Aabb};
use crate::error;
use crate::hierarchy::{union_of_child_bounds, HierarchyError, SceneHierarchy};
use crate::instance::{resolve_instance, InstanceCache, InstanceFingerprint, ResolvedAgentInstance};
use crate::library::TemplateLibrary;
use crate::mesh::SceneObject;
use crate::path::ScenePath;
use crate::points;
use crate::pose::BlendWeightConfig;
use crate::sets::SetBuilder;
use crate::template::AgentTemplate;
use crate::tree;

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandOptions {
    /// Name of the location holding every agent type.
    pub name: String,
    /// Share deformed geometry between agents with equal fingerprints.
    pub use_instances: bool,
    /// Grown onto every side of each agent's bounding box.
    pub bounding_box_padding: f32,
    pub blend_weights: BlendWeightConfig,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            name: "agents".to_string(),
            use_instances: true,
            bounding_box_padding: 0.0,
            blend_weights: BlendWeightConfig::default(),
        }
    }
}

impl ExpandOptions {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_instances(mut self, use_instances: bool) -> Self {
        self.use_instances = use_instances;
        self
    }

    pub fn with_padding(mut self, padding: f32) -> Self {
        self.bounding_box_padding = padding;
        self
    }

    pub fn with_blend_weights(mut self, blend_weights: BlendWeightConfig) -> Self {
        self.blend_weights = blend_weights;
        self
    }
}

// ============================================================================
// Agent Index
// ============================================================================

struct AgentSlot {
    agent_id: i64,
    point_index: usize,
    variation: String,
    lod: String,
    template: Arc<AgentTemplate>,
}

/// agent type → variation key → agent id → slot.
type AgentIndex = BTreeMap<String, BTreeMap<String, BTreeMap<i64, AgentSlot>>>;

enum Location<'a> {
    /// A location on the way to the parent or destination path.
    Skeleton,
    Agents,
    AgentType(&'a BTreeMap<String, BTreeMap<i64, AgentSlot>>),
    Variation(&'a BTreeMap<i64, AgentSlot>),
    Agent(&'a AgentSlot, &'a AgentRecord),
    Part(&'a AgentSlot, &'a AgentRecord, &'a [String]),
}

// ============================================================================
// Crowd Scene
// ============================================================================

/// The expanded crowd.
///
/// Nothing is deformed up front. Child names, transforms, attributes and
/// sets only need templates; objects and part bounds deform the queried
/// agent through the shared [`InstanceCache`], so agents with equal
/// fingerprints are deformed once.
pub struct CrowdScene {
    crowd: Arc<Crowd>,
    library: Arc<TemplateLibrary>,
    instances: Arc<InstanceCache>,
    parent_path: ScenePath,
    parent_attributes: Attributes,
    destination: ScenePath,
    options: ExpandOptions,
    cloth: Option<Arc<dyn ClothSource>>,
    skeleton: BTreeSet<ScenePath>,
    index: OnceLock<AgentIndex>,
    sets: OnceLock<BTreeMap<String, BTreeSet<ScenePath>>>,
    agents_bound: OnceLock<Aabb>,
}

impl CrowdScene {
    /// Expands `crowd` below `parent_path`, the location holding the crowd
    /// points. The destination defaults to the parent.
    pub fn new(
        crowd: Arc<Crowd>,
        library: Arc<TemplateLibrary>,
        parent_path: ScenePath,
        instances: Arc<InstanceCache>,
    ) -> Self {
        let mut scene = Self {
            crowd,
            library,
            instances,
            destination: parent_path.clone(),
            parent_path,
            parent_attributes: Attributes::new(),
            options: ExpandOptions::default(),
            cloth: None,
            skeleton: BTreeSet::new(),
            index: OnceLock::new(),
            sets: OnceLock::new(),
            agents_bound: OnceLock::new(),
        };
        scene.rebuild_skeleton();
        scene
    }

    pub fn with_destination(mut self, destination: ScenePath) -> Self {
        self.destination = destination;
        self.rebuild_skeleton();
        self
    }

    /// Attributes of the crowd points location, inherited by every agent.
    pub fn with_parent_attributes(mut self, attributes: Attributes) -> Self {
        self.parent_attributes = attributes;
        self
    }

    pub fn with_options(mut self, options: ExpandOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cloth(mut self, cloth: Arc<dyn ClothSource>) -> Self {
        self.cloth = Some(cloth);
        self
    }

    /// The location holding every agent type.
    pub fn agents_path(&self) -> ScenePath {
        self.destination.child(self.options.name.as_str())
    }

    pub fn options(&self) -> &ExpandOptions {
        &self.options
    }

    pub fn instances(&self) -> &InstanceCache {
        &self.instances
    }

    /// Number of agents placed in the hierarchy.
    pub fn agent_count(&self) -> usize {
        self.index()
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    /// Every leaf location below the agents root, usually one per part.
    /// Empty when no agent was placed.
    pub fn leaf_paths(&self) -> error::Result<Vec<ScenePath>> {
        if self.agent_count() == 0 {
            return Ok(Vec::new());
        }
        Ok(tree::leaf_paths(self, &self.agents_path())?)
    }

    /// Deforms every placed agent in parallel. Returns the number of
    /// distinct instances afterwards.
    pub fn resolve_all(&self) -> usize {
        let slots: Vec<&AgentSlot> = self
            .index()
            .values()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
            .collect();
        slots.par_iter().for_each(|slot| {
            if let Some(record) = self.crowd.agents.get(&slot.agent_id) {
                self.instance(slot, record);
            }
        });
        self.instances.len()
    }

    fn rebuild_skeleton(&mut self) {
        self.skeleton = self
            .parent_path
            .ancestors_inclusive()
            .chain(self.destination.ancestors_inclusive())
            .collect();
    }

    fn index(&self) -> &AgentIndex {
        self.index.get_or_init(|| self.build_index())
    }

    fn build_index(&self) -> AgentIndex {
        let points = &self.crowd.points;
        let mut groups: HashMap<(String, String), Option<Arc<AgentTemplate>>> = HashMap::new();
        let mut index = AgentIndex::new();

        for (point_index, &agent_id) in points.agent_ids().iter().enumerate() {
            let agent_type = points.string_at(points::AGENT_TYPE, point_index).unwrap_or_default();
            let variation = points.string_at(points::VARIATION, point_index).unwrap_or_default();
            let lod = points.string_at(points::LOD, point_index).unwrap_or_default();
            if agent_type.is_empty() || variation.is_empty() {
                log::debug!("Agent {} has no type or variation; skipped", agent_id);
                continue;
            }
            if !self.crowd.agents.contains_key(&agent_id) {
                log::warn!("Agent {} has no simulation record; skipped", agent_id);
                continue;
            }

            let key = variation_key(variation, lod);
            let template = groups
                .entry((agent_type.to_string(), key.clone()))
                .or_insert_with(|| match self.library.resolve(agent_type, &key) {
                    Ok(template) => Some(template),
                    Err(err) => {
                        log::warn!("{}; agents of this variation are skipped", err);
                        None
                    }
                })
                .clone();
            let Some(template) = template else { continue };

            index
                .entry(agent_type.to_string())
                .or_default()
                .entry(key)
                .or_default()
                .insert(
                    agent_id,
                    AgentSlot {
                        agent_id,
                        point_index,
                        variation: variation.to_string(),
                        lod: lod.to_string(),
                        template,
                    },
                );
        }
        index
    }

    fn locate<'a>(&'a self, path: &'a ScenePath) -> Result<Location<'a>, HierarchyError> {
        let not_found = || HierarchyError::PathNotFound(path.clone());

        let Some(tail) = path.strip_prefix(&self.agents_path()) else {
            return if self.skeleton.contains(path) {
                Ok(Location::Skeleton)
            } else {
                Err(not_found())
            };
        };

        let Some((agent_type, tail)) = tail.split_first() else {
            return Ok(Location::Agents);
        };
        let variations = self.index().get(agent_type).ok_or_else(not_found)?;

        let Some((variation, tail)) = tail.split_first() else {
            return Ok(Location::AgentType(variations));
        };
        let agents = variations.get(variation).ok_or_else(not_found)?;

        let Some((agent_id, parts)) = tail.split_first() else {
            return Ok(Location::Variation(agents));
        };
        let slot = agent_id
            .parse::<i64>()
            .ok()
            .filter(|id| id.to_string() == *agent_id)
            .and_then(|id| agents.get(&id))
            .ok_or_else(not_found)?;
        let record = self.crowd.agents.get(&slot.agent_id).ok_or_else(not_found)?;

        if parts.is_empty() {
            return Ok(Location::Agent(slot, record));
        }
        slot.template.part(parts).ok_or_else(not_found)?;
        Ok(Location::Part(slot, record, parts))
    }

    fn instance(&self, slot: &AgentSlot, record: &AgentRecord) -> Arc<ResolvedAgentInstance> {
        let weights = self.options.blend_weights.resolve(
            &slot.template,
            record,
            &self.crowd.points,
            Some(slot.point_index),
        );
        let cloth = self
            .cloth
            .as_deref()
            .filter(|cloth| cloth.has_agent(slot.agent_id));
        let unique = (!self.options.use_instances || cloth.is_some()).then_some(slot.agent_id);
        let fingerprint = InstanceFingerprint::compute(
            &slot.template,
            record,
            &weights,
            self.library.content_key(),
            unique,
        );

        self.instances.get_or_compute(&fingerprint, || {
            log::debug!("Resolving agent {} ({:?})", slot.agent_id, fingerprint);
            let mut instance = resolve_instance(&slot.template, record, &weights);
            if let Some(cloth) = cloth {
                apply_cloth(&mut instance, slot.agent_id, cloth);
            }
            Arc::new(instance)
        })
    }

    fn agent_bound(&self, slot: &AgentSlot, record: &AgentRecord) -> Aabb {
        let bound = if record.bounding_box.is_empty() {
            self.instance(slot, record).bound
        } else {
            record.bounding_box
        };
        bound.pad(self.options.bounding_box_padding)
    }

    fn union_of_agents<'a>(&self, slots: impl Iterator<Item = &'a AgentSlot>) -> Aabb {
        slots.fold(Aabb::empty(), |bound, slot| match self.crowd.agents.get(&slot.agent_id) {
            Some(record) => bound.merge(&self.agent_bound(slot, record).transform(&record.root_transform)),
            None => bound,
        })
    }

    fn agent_attributes(&self, slot: &AgentSlot, record: &AgentRecord, agent_type: &str) -> Attributes {
        let mut attributes: Attributes = record
            .metadata
            .iter()
            .map(|(key, value)| (format!("atoms:{}", key), value.clone()))
            .collect();

        for (name, column) in self.crowd.points.variables() {
            if !name.starts_with("atoms:") {
                continue;
            }
            let value = match column.get(slot.point_index) {
                Some(AttributeValue::Quaternion(q)) => {
                    AttributeValue::Vector3(transform_ops::quaternion_to_euler_degrees(q))
                }
                Some(value) => value,
                None => continue,
            };
            attributes.insert(name.clone(), value);
        }

        attributes.insert(
            "user:atoms:agentType".to_string(),
            AttributeValue::String(agent_type.to_string()),
        );
        attributes.insert(
            "user:atoms:variation".to_string(),
            AttributeValue::String(slot.variation.clone()),
        );
        attributes
    }

    fn build_sets(&self) -> BTreeMap<String, BTreeSet<ScenePath>> {
        let mut builder = SetBuilder::new();
        let agents_path = self.agents_path();
        for (agent_type, variations) in self.index() {
            for (key, agents) in variations {
                let variation_path = agents_path.child(agent_type.as_str()).child(key.as_str());
                for (agent_id, slot) in agents {
                    builder.add_agent(
                        &variation_path.child(agent_id.to_string()),
                        agent_type,
                        &slot.variation,
                        &slot.lod,
                        &slot.template,
                    );
                }
            }
        }
        builder.build()
    }
}

impl SceneHierarchy for CrowdScene {
    fn child_names(&self, path: &ScenePath) -> Result<Vec<String>, HierarchyError> {
        Ok(match self.locate(path)? {
            Location::Skeleton => {
                let mut names: BTreeSet<String> = self
                    .skeleton
                    .iter()
                    .filter(|p| p.parent().as_ref() == Some(path))
                    .filter_map(|p| p.name().map(str::to_owned))
                    .collect();
                if *path == self.destination {
                    names.insert(self.options.name.clone());
                }
                names.into_iter().collect()
            }
            Location::Agents => self.index().keys().cloned().collect(),
            Location::AgentType(variations) => variations.keys().cloned().collect(),
            Location::Variation(agents) => agents.keys().map(i64::to_string).collect(),
            Location::Agent(slot, _) => slot.template.parts.keys().cloned().collect(),
            Location::Part(slot, _, parts) => slot
                .template
                .part(parts)
                .map(|part| part.children.keys().cloned().collect())
                .unwrap_or_default(),
        })
    }

    fn object(&self, path: &ScenePath) -> Result<Option<SceneObject>, HierarchyError> {
        Ok(match self.locate(path)? {
            Location::Skeleton if *path == self.parent_path => {
                Some(SceneObject::Points(Arc::clone(&self.crowd.points)))
            }
            Location::Part(slot, record, parts) => self
                .instance(slot, record)
                .part(parts)
                .and_then(|part| part.mesh.clone())
                .map(SceneObject::Mesh),
            _ => None,
        })
    }

    fn transform(&self, path: &ScenePath) -> Result<Matrix4<f32>, HierarchyError> {
        Ok(match self.locate(path)? {
            Location::Agent(_, record) => record.root_transform,
            Location::Part(slot, _, parts) => slot
                .template
                .part(parts)
                .map(|part| part.transform)
                .unwrap_or_else(Matrix4::identity),
            _ => Matrix4::identity(),
        })
    }

    fn bound(&self, path: &ScenePath) -> Result<Aabb, HierarchyError> {
        Ok(match self.locate(path)? {
            Location::Skeleton => {
                let mut bound = union_of_child_bounds(self, path)?;
                if *path == self.parent_path {
                    bound = bound.merge(&Aabb::from_points(&self.crowd.points.positions).unwrap_or_default());
                }
                bound
            }
            Location::Agents => *self.agents_bound.get_or_init(|| {
                self.union_of_agents(
                    self.index()
                        .values()
                        .flat_map(BTreeMap::values)
                        .flat_map(BTreeMap::values),
                )
            }),
            Location::AgentType(variations) => {
                self.union_of_agents(variations.values().flat_map(BTreeMap::values))
            }
            Location::Variation(agents) => self.union_of_agents(agents.values()),
            Location::Agent(slot, record) => self.agent_bound(slot, record),
            Location::Part(slot, record, parts) => self
                .instance(slot, record)
                .part(parts)
                .map(|part| part.bound)
                .unwrap_or_default(),
        })
    }

    fn attributes(&self, path: &ScenePath) -> Result<Attributes, HierarchyError> {
        Ok(match self.locate(path)? {
            Location::Skeleton if *path == self.parent_path => self.parent_attributes.clone(),
            Location::Agent(slot, record) => {
                let agent_type = &path.segments()[path.len() - 3];
                self.agent_attributes(slot, record, agent_type)
            }
            Location::Part(slot, record, parts) => {
                let has_cloth = self
                    .cloth
                    .as_ref()
                    .is_some_and(|cloth| cloth.has_agent(slot.agent_id));
                if has_cloth {
                    self.instance(slot, record)
                        .part(parts)
                        .map(|part| part.attributes.clone())
                        .unwrap_or_default()
                } else {
                    slot.template
                        .part(parts)
                        .map(|part| strip_skin_attributes(&part.attributes))
                        .unwrap_or_default()
                }
            }
            _ => Attributes::new(),
        })
    }

    fn set_names(&self) -> Vec<String> {
        self.sets
            .get_or_init(|| self.build_sets())
            .keys()
            .cloned()
            .collect()
    }

    fn set(&self, name: &str) -> BTreeSet<ScenePath> {
        self.sets
            .get_or_init(|| self.build_sets())
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}
