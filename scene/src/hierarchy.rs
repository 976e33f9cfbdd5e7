//! The path-addressed scene contract shared by the template library and
//! the crowd expansion.

use std::collections::BTreeSet;

use cgmath::{Matrix4, SquareMatrix};
use thiserror::Error;

use crate::attributes::{merge_attributes, Attributes};
use crate::common::Aabb;
use crate::mesh::SceneObject;
use crate::path::ScenePath;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("Path not found: {0}")]
    PathNotFound(ScenePath),
}

/// A lazily evaluated tree of locations.
///
/// Every query fails with [`HierarchyError::PathNotFound`] outside the tree.
/// Valid locations with nothing interesting to report return empty
/// defaults: no object, identity transform, empty bound, no attributes.
/// Implementations are read-only and may be queried from many threads.
pub trait SceneHierarchy: Send + Sync {
    /// Child names in a stable order.
    fn child_names(&self, path: &ScenePath) -> Result<Vec<String>, HierarchyError>;

    fn object(&self, path: &ScenePath) -> Result<Option<SceneObject>, HierarchyError>;

    /// Local transform relative to the parent location.
    fn transform(&self, path: &ScenePath) -> Result<Matrix4<f32>, HierarchyError>;

    /// Bound in the location's own space, including all descendants.
    fn bound(&self, path: &ScenePath) -> Result<Aabb, HierarchyError>;

    /// Attributes set directly on the location.
    fn attributes(&self, path: &ScenePath) -> Result<Attributes, HierarchyError>;

    fn set_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Members of a named set. Unknown names give an empty set.
    fn set(&self, _name: &str) -> BTreeSet<ScenePath> {
        BTreeSet::new()
    }

    fn exists(&self, path: &ScenePath) -> bool {
        self.child_names(path).is_ok()
    }

    /// Attributes inherited from every ancestor, deeper locations winning.
    fn full_attributes(&self, path: &ScenePath) -> Result<Attributes, HierarchyError> {
        let mut merged = Attributes::new();
        for ancestor in path.ancestors_inclusive() {
            merge_attributes(&mut merged, self.attributes(&ancestor)?);
        }
        Ok(merged)
    }

    /// Product of local transforms from the root down to `path`.
    fn full_transform(&self, path: &ScenePath) -> Result<Matrix4<f32>, HierarchyError> {
        let mut world = Matrix4::identity();
        for ancestor in path.ancestors_inclusive() {
            world = world * self.transform(&ancestor)?;
        }
        Ok(world)
    }
}

/// Union of every child's bound, each moved into `path`'s space.
pub fn union_of_child_bounds<H: SceneHierarchy + ?Sized>(
    hierarchy: &H,
    path: &ScenePath,
) -> Result<Aabb, HierarchyError> {
    let mut bound = Aabb::empty();
    for name in hierarchy.child_names(path)? {
        let child = path.child(name);
        let child_bound = hierarchy.bound(&child)?;
        bound = bound.merge(&child_bound.transform(&hierarchy.transform(&child)?));
    }
    Ok(bound)
}
