pub use atoms_crowd_common as common;

pub mod agent;
pub mod attributes;
pub mod cache;
pub mod cloth;
pub mod crowd;
pub mod error;
pub mod format;
pub mod hierarchy;
pub mod instance;
pub mod library;
pub mod mesh;
pub mod metadata;
pub mod path;
pub mod points;
pub mod pose;
pub mod selector;
pub mod sets;
pub mod source;
pub mod template;
pub mod tree;

pub use agent::{AgentRecord, Crowd};
pub use attributes::{AttributeValue, Attributes};
pub use cache::{CacheStats, KeyedCache};
pub use cloth::{ClothCache, ClothEntry, ClothFrames, ClothReader, ClothSource};
pub use crowd::{CrowdScene, ExpandOptions};
pub use error::CrowdError;
pub use format::{FileClothSource, FileSimulationSource, FileVariationSource, FormatError};
pub use hierarchy::{HierarchyError, SceneHierarchy};
pub use instance::{InstanceCache, InstanceFingerprint, ResolvedAgentInstance};
pub use library::{CacheToken, LibraryOptions, LibraryScene, TemplateLibrary, VariationSet};
pub use mesh::{Mesh, SceneObject};
pub use metadata::MetadataOverlay;
pub use path::ScenePath;
pub use points::CrowdPoints;
pub use pose::BlendWeightConfig;
pub use selector::{AgentSelector, SelectorError};
pub use source::{CrowdReader, FrameCache, ReaderOptions, SourceError};
pub use template::{AgentTemplate, SkinBinding, TemplatePart};

#[cfg(test)]
mod scene_tests;
