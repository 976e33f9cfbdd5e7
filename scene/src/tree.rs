use crate::hierarchy::{HierarchyError, SceneHierarchy};
use crate::path::ScenePath;

/// Trait for implementing hierarchy traversal operations.
///
/// Implementors of this trait can be passed to [`walk_hierarchy`] to perform
/// arbitrary operations on each location during traversal.
pub trait TreeVisitor {
    /// Called when entering a location (before processing its children).
    ///
    /// Returns true to continue traversing children, false to skip the subtree.
    fn enter_location(&mut self, hierarchy: &dyn SceneHierarchy, path: &ScenePath) -> bool;

    /// Called when exiting a location (after processing its children).
    fn exit_location(&mut self, _hierarchy: &dyn SceneHierarchy, _path: &ScenePath) {}
}

/// Walks the hierarchy depth-first starting from `path`.
pub fn walk_hierarchy<V: TreeVisitor>(
    hierarchy: &dyn SceneHierarchy,
    path: &ScenePath,
    visitor: &mut V,
) -> Result<(), HierarchyError> {
    let children = hierarchy.child_names(path)?;

    if visitor.enter_location(hierarchy, path) {
        for name in children {
            walk_hierarchy(hierarchy, &path.child(name), visitor)?;
        }
    }

    visitor.exit_location(hierarchy, path);
    Ok(())
}

/// Collects every location without children below (and including) the start.
#[derive(Debug, Default)]
pub struct LeafCollector {
    pub leaves: Vec<ScenePath>,
}

impl TreeVisitor for LeafCollector {
    fn enter_location(&mut self, hierarchy: &dyn SceneHierarchy, path: &ScenePath) -> bool {
        match hierarchy.child_names(path) {
            Ok(children) if children.is_empty() => {
                self.leaves.push(path.clone());
                false
            }
            Ok(_) => true,
            Err(_) => false,
        }
    }
}

/// Collects every visited location in depth-first order.
#[derive(Debug, Default)]
pub struct PathCollector {
    pub paths: Vec<ScenePath>,
}

impl TreeVisitor for PathCollector {
    fn enter_location(&mut self, _hierarchy: &dyn SceneHierarchy, path: &ScenePath) -> bool {
        self.paths.push(path.clone());
        true
    }
}

/// Every leaf below `path`.
pub fn leaf_paths(
    hierarchy: &dyn SceneHierarchy,
    path: &ScenePath,
) -> Result<Vec<ScenePath>, HierarchyError> {
    let mut collector = LeafCollector::default();
    walk_hierarchy(hierarchy, path, &mut collector)?;
    Ok(collector.leaves)
}
