use std::fmt;

use serde::{Deserialize, Serialize};

/// A slash-delimited location in a scene hierarchy.
///
/// The root is the empty sequence and renders as `/`. Empty segments are
/// dropped when parsing, so `"//crowd/agents/"` and `"/crowd/agents"` are the
/// same path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScenePath(Vec<String>);

impl ScenePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn parse(path: &str) -> Self {
        Self(
            path.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Last segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }

    pub fn join(&self, tail: &[String]) -> Self {
        let mut segments = self.0.clone();
        segments.extend_from_slice(tail);
        Self(segments)
    }

    pub fn starts_with(&self, prefix: &ScenePath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Segments after `prefix`, or `None` when `prefix` is not a prefix.
    pub fn strip_prefix(&self, prefix: &ScenePath) -> Option<&[String]> {
        self.0.strip_prefix(prefix.0.as_slice())
    }

    /// Every prefix from the root down to and including this path.
    pub fn ancestors_inclusive(&self) -> impl Iterator<Item = ScenePath> + '_ {
        (0..=self.0.len()).map(move |n| Self(self.0[..n].to_vec()))
    }
}

impl fmt::Display for ScenePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl From<&str> for ScenePath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}
