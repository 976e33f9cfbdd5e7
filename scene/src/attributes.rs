//! Typed attribute values attached to scene locations and crowd points.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use cgmath::{Matrix4, Quaternion, SquareMatrix, Vector2, Vector3, Zero};
use serde::{Deserialize, Serialize};

/// Attribute names consumed by skinning. They never appear on expanded parts.
pub const SKIN_ATTRIBUTE_NAMES: [&str; 3] = ["jointIndexCount", "jointIndices", "jointWeights"];

/// Ordered attribute container. Ordering keeps attribute dumps deterministic.
pub type Attributes = BTreeMap<String, AttributeValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Vector2(Vector2<f32>),
    Vector3(Vector3<f32>),
    Quaternion(Quaternion<f32>),
    Matrix(Matrix4<f32>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f32>),
    StringArray(Vec<String>),
}

impl AttributeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Vector2(_) => "vector2",
            Self::Vector3(_) => "vector3",
            Self::Quaternion(_) => "quaternion",
            Self::Matrix(_) => "matrix",
            Self::IntArray(_) => "int[]",
            Self::FloatArray(_) => "float[]",
            Self::StringArray(_) => "string[]",
        }
    }

    /// True when both values hold the same variant.
    pub fn same_kind(&self, other: &AttributeValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// The value a freshly created column of this kind is filled with.
    pub fn type_default(&self) -> AttributeValue {
        match self {
            Self::Bool(_) => Self::Bool(false),
            Self::Int(_) => Self::Int(0),
            Self::Float(_) => Self::Float(0.0),
            Self::String(_) => Self::String(String::new()),
            Self::Vector2(_) => Self::Vector2(Vector2::zero()),
            Self::Vector3(_) => Self::Vector3(Vector3::zero()),
            Self::Quaternion(_) => Self::Quaternion(Quaternion::new(1.0, 0.0, 0.0, 0.0)),
            Self::Matrix(_) => Self::Matrix(Matrix4::identity()),
            Self::IntArray(_) => Self::IntArray(Vec::new()),
            Self::FloatArray(_) => Self::FloatArray(Vec::new()),
            Self::StringArray(_) => Self::StringArray(Vec::new()),
        }
    }

    /// Numeric view of scalar values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Feeds the bit pattern of this value into `state`. Floats hash by bits,
    /// so equal values always hash equal and `-0.0` differs from `0.0`.
    pub fn hash_into<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::String(v) => v.hash(state),
            Self::Vector2(v) => hash_floats(&[v.x, v.y], state),
            Self::Vector3(v) => hash_floats(&[v.x, v.y, v.z], state),
            Self::Quaternion(q) => hash_floats(&[q.s, q.v.x, q.v.y, q.v.z], state),
            Self::Matrix(m) => {
                let values: &[f32; 16] = m.as_ref();
                hash_floats(values, state)
            }
            Self::IntArray(v) => v.hash(state),
            Self::FloatArray(v) => hash_floats(v, state),
            Self::StringArray(v) => v.hash(state),
        }
    }
}

pub(crate) fn hash_floats<H: Hasher>(values: &[f32], state: &mut H) {
    values.len().hash(state);
    for v in values {
        v.to_bits().hash(state);
    }
}

/// Returns `attributes` without the skin binding entries.
pub fn strip_skin_attributes(attributes: &Attributes) -> Attributes {
    attributes
        .iter()
        .filter(|(name, _)| !SKIN_ATTRIBUTE_NAMES.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Overlays `child` onto `parent`; entries in `child` win.
pub fn merge_attributes(parent: &mut Attributes, child: Attributes) {
    parent.extend(child);
}
