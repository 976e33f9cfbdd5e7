//! Agent template library: variation lookup with LOD fallback and an
//! explicitly invalidated template cache.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cgmath::{Matrix4, SquareMatrix};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attributes::Attributes;
use crate::cache::{CacheStats, KeyedCache};
use crate::common::Aabb;
use crate::hierarchy::{HierarchyError, SceneHierarchy};
use crate::mesh::{Mesh, SceneObject};
use crate::path::ScenePath;
use crate::source::SourceError;
use crate::template::{AgentTemplate, TemplatePart};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("No template for agent type '{agent_type}' variation '{variation}'")]
    NotFound {
        agent_type: String,
        variation: String,
    },
}

/// Root parts of one variation, keyed by name.
pub type VariationParts = BTreeMap<String, TemplatePart>;

/// Supplies variation descriptions.
pub trait VariationSource: Send + Sync {
    fn agent_types(&self) -> Result<Vec<String>, SourceError>;

    /// Declared variation names of a type, including `name:lod` entries.
    fn variations(&self, agent_type: &str) -> Result<Vec<String>, SourceError>;

    /// The part tree of an exact variation name, `None` when undeclared.
    fn load(&self, agent_type: &str, variation: &str) -> Result<Option<VariationParts>, SourceError>;

    /// Changes whenever the described content changes.
    fn content_hash(&self) -> u64;
}

/// Variations held in memory: agent type → variation → root parts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariationSet {
    pub types: BTreeMap<String, BTreeMap<String, VariationParts>>,
}

impl VariationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, agent_type: impl Into<String>, variation: impl Into<String>, parts: VariationParts) {
        self.types
            .entry(agent_type.into())
            .or_default()
            .insert(variation.into(), parts);
    }

    pub fn with_variation(
        mut self,
        agent_type: impl Into<String>,
        variation: impl Into<String>,
        parts: VariationParts,
    ) -> Self {
        self.insert(agent_type, variation, parts);
        self
    }
}

impl VariationSource for VariationSet {
    fn agent_types(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.types.keys().cloned().collect())
    }

    fn variations(&self, agent_type: &str) -> Result<Vec<String>, SourceError> {
        Ok(self
            .types
            .get(agent_type)
            .map(|v| v.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn load(&self, agent_type: &str, variation: &str) -> Result<Option<VariationParts>, SourceError> {
        Ok(self
            .types
            .get(agent_type)
            .and_then(|v| v.get(variation))
            .cloned())
    }

    fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        match bincode::serialize(self) {
            Ok(bytes) => bytes.hash(&mut hasher),
            Err(err) => log::warn!("Could not hash variation content: {}", err),
        }
        hasher.finish()
    }
}

// ============================================================================
// Library
// ============================================================================

/// Options applied to every template as it is loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibraryOptions {
    /// Keep a copy of rest positions as `pref` on every mesh.
    pub generate_pref: bool,
    /// Keep a copy of rest normals as `nref` on every mesh.
    pub generate_nref: bool,
}

/// Invalidation key of the template cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CacheToken {
    pub refresh_count: u64,
    pub content_hash: u64,
}

type TemplateKey = (String, String);

/// Resolves `(agent type, variation)` to shared templates.
///
/// One library is one evaluation context: callers own it and drop or
/// [`refresh`](TemplateLibrary::refresh) it to invalidate.
pub struct TemplateLibrary {
    source: Arc<dyn VariationSource>,
    options: LibraryOptions,
    templates: KeyedCache<TemplateKey, Option<Arc<AgentTemplate>>>,
    token: Mutex<CacheToken>,
    generation: AtomicU64,
}

impl TemplateLibrary {
    pub fn new(source: Arc<dyn VariationSource>, options: LibraryOptions) -> Self {
        let token = CacheToken {
            refresh_count: 0,
            content_hash: source.content_hash(),
        };
        Self {
            source,
            options,
            templates: KeyedCache::new(),
            token: Mutex::new(token),
            generation: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> LibraryOptions {
        self.options
    }

    /// Bumped on every invalidation; instance fingerprints include it.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Identifies the templates this library currently serves: the source
    /// content hash, the load options and the generation. Libraries over
    /// different content never share a key, so one instance cache can
    /// serve several of them.
    pub fn content_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.token().content_hash.hash(&mut hasher);
        self.options.generate_pref.hash(&mut hasher);
        self.options.generate_nref.hash(&mut hasher);
        self.generation().hash(&mut hasher);
        hasher.finish()
    }

    pub fn token(&self) -> CacheToken {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops every cached template when `refresh_count` differs from the
    /// last one seen or the source content changed. Returns whether the
    /// cache was invalidated.
    pub fn refresh(&self, refresh_count: u64) -> bool {
        let next = CacheToken {
            refresh_count,
            content_hash: self.source.content_hash(),
        };
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if *token == next {
            return false;
        }
        *token = next;
        self.templates.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
        log::debug!("Template cache invalidated (generation {})", self.generation());
        true
    }

    /// Resolves a variation, falling back from `name:suffix` to `name`.
    pub fn resolve(&self, agent_type: &str, variation: &str) -> Result<Arc<AgentTemplate>, TemplateError> {
        if let Some(template) = self.cached(agent_type, variation) {
            return Ok(template);
        }
        if let Some((base, _)) = variation.rsplit_once(':') {
            if let Some(template) = self.cached(agent_type, base) {
                return Ok(template);
            }
        }
        Err(TemplateError::NotFound {
            agent_type: agent_type.to_string(),
            variation: variation.to_string(),
        })
    }

    /// Resolves an exact variation name, without fallback.
    pub fn resolve_exact(&self, agent_type: &str, variation: &str) -> Result<Arc<AgentTemplate>, TemplateError> {
        self.cached(agent_type, variation)
            .ok_or_else(|| TemplateError::NotFound {
                agent_type: agent_type.to_string(),
                variation: variation.to_string(),
            })
    }

    pub fn agent_types(&self) -> Vec<String> {
        self.source.agent_types().unwrap_or_else(|err| {
            log::warn!("Cannot list agent types: {}", err);
            Vec::new()
        })
    }

    pub fn variations(&self, agent_type: &str) -> Vec<String> {
        self.source.variations(agent_type).unwrap_or_else(|err| {
            log::warn!("Cannot list variations of '{}': {}", agent_type, err);
            Vec::new()
        })
    }

    pub fn stats(&self) -> CacheStats {
        self.templates.stats()
    }

    fn cached(&self, agent_type: &str, variation: &str) -> Option<Arc<AgentTemplate>> {
        let key = (agent_type.to_string(), variation.to_string());
        self.templates
            .get_or_compute(&key, || self.load(agent_type, variation))
    }

    fn load(&self, agent_type: &str, variation: &str) -> Option<Arc<AgentTemplate>> {
        let parts = match self.source.load(agent_type, variation) {
            Ok(Some(parts)) => parts,
            Ok(None) => return None,
            Err(err) => {
                log::warn!("Failed to load variation {}:{}: {}", agent_type, variation, err);
                return None;
            }
        };
        log::debug!("Loaded template {}:{}", agent_type, variation);

        let mut parts = parts;
        if self.options.generate_pref || self.options.generate_nref {
            for part in parts.values_mut() {
                store_rest(part, self.options);
            }
        }
        Some(Arc::new(AgentTemplate::new(agent_type, variation, parts)))
    }
}

fn store_rest(part: &mut TemplatePart, options: LibraryOptions) {
    if let Some(mesh) = &mut part.mesh {
        Arc::make_mut(mesh).store_rest(options.generate_pref, options.generate_nref);
    }
    for child in part.children.values_mut() {
        store_rest(child, options);
    }
}

// ============================================================================
// Library Hierarchy
// ============================================================================

/// The library as a scene: `/<agentType>/<variation>/<part...>`.
///
/// Parts expose their rest meshes (blend shapes included) and their skin
/// bindings as `jointIndexCount`/`jointIndices`/`jointWeights` attributes.
/// Sets are `<agentType>`, `<agentType>:<variation>` and every set declared
/// on a part.
pub struct LibraryScene {
    library: Arc<TemplateLibrary>,
}

enum LibraryLocation {
    Root,
    AgentType,
    Variation(Arc<AgentTemplate>),
    Part(Arc<AgentTemplate>, Vec<String>),
}

impl LibraryScene {
    pub fn new(library: Arc<TemplateLibrary>) -> Self {
        Self { library }
    }

    fn locate(&self, path: &ScenePath) -> Result<LibraryLocation, HierarchyError> {
        let not_found = || HierarchyError::PathNotFound(path.clone());
        let segments = path.segments();
        let Some((agent_type, rest)) = segments.split_first() else {
            return Ok(LibraryLocation::Root);
        };
        if !self.library.agent_types().contains(agent_type) {
            return Err(not_found());
        }
        let Some((variation, parts)) = rest.split_first() else {
            return Ok(LibraryLocation::AgentType);
        };
        let template = self
            .library
            .resolve_exact(agent_type, variation)
            .map_err(|_| not_found())?;
        if parts.is_empty() {
            return Ok(LibraryLocation::Variation(template));
        }
        if template.part(parts).is_none() {
            return Err(not_found());
        }
        Ok(LibraryLocation::Part(template, parts.to_vec()))
    }

    fn part_bound(part: &TemplatePart) -> Aabb {
        let own = part.mesh.as_deref().map(Mesh::bound).unwrap_or_default();
        part.children.values().fold(own, |bound, child| {
            bound.merge(&Self::part_bound(child).transform(&child.transform))
        })
    }
}

impl SceneHierarchy for LibraryScene {
    fn child_names(&self, path: &ScenePath) -> Result<Vec<String>, HierarchyError> {
        Ok(match self.locate(path)? {
            LibraryLocation::Root => self.library.agent_types(),
            LibraryLocation::AgentType => self.library.variations(&path.segments()[0]),
            LibraryLocation::Variation(template) => template.parts.keys().cloned().collect(),
            LibraryLocation::Part(template, parts) => template
                .part(&parts)
                .map(|p| p.children.keys().cloned().collect())
                .unwrap_or_default(),
        })
    }

    fn object(&self, path: &ScenePath) -> Result<Option<SceneObject>, HierarchyError> {
        Ok(match self.locate(path)? {
            LibraryLocation::Part(template, parts) => template
                .part(&parts)
                .and_then(|p| p.mesh.clone())
                .map(SceneObject::Mesh),
            _ => None,
        })
    }

    fn transform(&self, path: &ScenePath) -> Result<Matrix4<f32>, HierarchyError> {
        Ok(match self.locate(path)? {
            LibraryLocation::Part(template, parts) => template
                .part(&parts)
                .map(|p| p.transform)
                .unwrap_or_else(Matrix4::identity),
            _ => Matrix4::identity(),
        })
    }

    fn bound(&self, path: &ScenePath) -> Result<Aabb, HierarchyError> {
        match self.locate(path)? {
            LibraryLocation::Part(template, parts) => {
                Ok(template.part(&parts).map(Self::part_bound).unwrap_or_default())
            }
            LibraryLocation::Variation(template) => Ok(template
                .parts
                .values()
                .fold(Aabb::empty(), |b, p| b.merge(&Self::part_bound(p).transform(&p.transform)))),
            _ => crate::hierarchy::union_of_child_bounds(self, path),
        }
    }

    fn attributes(&self, path: &ScenePath) -> Result<Attributes, HierarchyError> {
        Ok(match self.locate(path)? {
            LibraryLocation::Part(template, parts) => template
                .part(&parts)
                .map(TemplatePart::declared_attributes)
                .unwrap_or_default(),
            _ => Attributes::new(),
        })
    }

    fn set_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for agent_type in self.library.agent_types() {
            for variation in self.library.variations(&agent_type) {
                names.insert(format!("{}:{}", agent_type, variation));
                if let Ok(template) = self.library.resolve_exact(&agent_type, &variation) {
                    names.extend(template.declared_sets());
                }
            }
            names.insert(agent_type);
        }
        names.into_iter().collect()
    }

    fn set(&self, name: &str) -> BTreeSet<ScenePath> {
        let mut members = BTreeSet::new();
        for agent_type in self.library.agent_types() {
            for variation in self.library.variations(&agent_type) {
                let Ok(template) = self.library.resolve_exact(&agent_type, &variation) else {
                    continue;
                };
                let whole = name == agent_type || name == format!("{}:{}", agent_type, variation);
                let base = ScenePath::root().child(agent_type.as_str()).child(variation.as_str());
                for leaf in template.leaves() {
                    if whole || leaf.sets.contains(name) {
                        members.insert(base.join(leaf.path.segments()));
                    }
                }
            }
        }
        members
    }
}
