use thiserror::Error;

use crate::format::FormatError;
use crate::hierarchy::HierarchyError;
use crate::library::TemplateError;
use crate::pose::SkinningError;
use crate::selector::SelectorError;
use crate::source::SourceError;

/// Any failure surfaced by the crowd pipeline.
#[derive(Debug, Error)]
pub enum CrowdError {
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Skinning(#[from] SkinningError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Format(#[from] FormatError),
}

pub type Result<T, E = CrowdError> = std::result::Result<T, E>;
