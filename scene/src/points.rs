//! Per-agent point data: one point per simulated agent with typed columns.

use std::collections::BTreeMap;

use cgmath::{Matrix4, Point3, Quaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::attributes::AttributeValue;

pub const AGENT_ID: &str = "atoms:agentId";
pub const AGENT_TYPE: &str = "atoms:agentType";
pub const VARIATION: &str = "atoms:variation";
pub const LOD: &str = "atoms:lod";
pub const POSITION: &str = "atoms:position";

/// A typed per-point column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PointVariable {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
    String(Vec<String>),
    Vector2(Vec<Vector2<f32>>),
    Vector3(Vec<Vector3<f32>>),
    Quaternion(Vec<Quaternion<f32>>),
    Matrix(Vec<Matrix4<f32>>),
}

impl PointVariable {
    /// A column of `len` copies of `value`. Array values have no column form.
    pub fn filled(value: &AttributeValue, len: usize) -> Option<Self> {
        Some(match value {
            AttributeValue::Bool(v) => Self::Bool(vec![*v; len]),
            AttributeValue::Int(v) => Self::Int(vec![*v; len]),
            AttributeValue::Float(v) => Self::Float(vec![*v; len]),
            AttributeValue::String(v) => Self::String(vec![v.clone(); len]),
            AttributeValue::Vector2(v) => Self::Vector2(vec![*v; len]),
            AttributeValue::Vector3(v) => Self::Vector3(vec![*v; len]),
            AttributeValue::Quaternion(v) => Self::Quaternion(vec![*v; len]),
            AttributeValue::Matrix(v) => Self::Matrix(vec![*v; len]),
            AttributeValue::IntArray(_)
            | AttributeValue::FloatArray(_)
            | AttributeValue::StringArray(_) => return None,
        })
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::String(v) => v.len(),
            Self::Vector2(v) => v.len(),
            Self::Vector3(v) => v.len(),
            Self::Quaternion(v) => v.len(),
            Self::Matrix(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<AttributeValue> {
        Some(match self {
            Self::Bool(v) => AttributeValue::Bool(*v.get(index)?),
            Self::Int(v) => AttributeValue::Int(*v.get(index)?),
            Self::Float(v) => AttributeValue::Float(*v.get(index)?),
            Self::String(v) => AttributeValue::String(v.get(index)?.clone()),
            Self::Vector2(v) => AttributeValue::Vector2(*v.get(index)?),
            Self::Vector3(v) => AttributeValue::Vector3(*v.get(index)?),
            Self::Quaternion(v) => AttributeValue::Quaternion(*v.get(index)?),
            Self::Matrix(v) => AttributeValue::Matrix(*v.get(index)?),
        })
    }

    /// Writes `value` at `index`. Returns false on a type mismatch or an
    /// out-of-range index, leaving the column untouched.
    pub fn set(&mut self, index: usize, value: &AttributeValue) -> bool {
        match (self, value) {
            (Self::Bool(v), AttributeValue::Bool(x)) => put(v, index, *x),
            (Self::Int(v), AttributeValue::Int(x)) => put(v, index, *x),
            (Self::Float(v), AttributeValue::Float(x)) => put(v, index, *x),
            (Self::String(v), AttributeValue::String(x)) => put(v, index, x.clone()),
            (Self::Vector2(v), AttributeValue::Vector2(x)) => put(v, index, *x),
            (Self::Vector3(v), AttributeValue::Vector3(x)) => put(v, index, *x),
            (Self::Quaternion(v), AttributeValue::Quaternion(x)) => put(v, index, *x),
            (Self::Matrix(v), AttributeValue::Matrix(x)) => put(v, index, *x),
            _ => false,
        }
    }
}

fn put<T>(column: &mut [T], index: usize, value: T) -> bool {
    match column.get_mut(index) {
        Some(slot) => {
            *slot = value;
            true
        }
        None => false,
    }
}

/// The crowd as a points primitive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrowdPoints {
    pub positions: Vec<Point3<f32>>,
    variables: BTreeMap<String, PointVariable>,
}

impl CrowdPoints {
    pub fn new(positions: Vec<Point3<f32>>) -> Self {
        Self {
            positions,
            variables: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn variable(&self, name: &str) -> Option<&PointVariable> {
        self.variables.get(name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut PointVariable> {
        self.variables.get_mut(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&String, &PointVariable)> {
        self.variables.iter()
    }

    /// Inserts a column. Columns must have one entry per point.
    pub fn insert_variable(&mut self, name: impl Into<String>, variable: PointVariable) -> bool {
        if variable.len() != self.len() {
            return false;
        }
        self.variables.insert(name.into(), variable);
        true
    }

    pub fn value(&self, name: &str, index: usize) -> Option<AttributeValue> {
        self.variables.get(name)?.get(index)
    }

    pub fn string_at(&self, name: &str, index: usize) -> Option<&str> {
        match self.variables.get(name)? {
            PointVariable::String(values) => values.get(index).map(String::as_str),
            _ => None,
        }
    }

    /// Agent ids in point order. Empty when the id column is missing.
    pub fn agent_ids(&self) -> &[i64] {
        match self.variables.get(AGENT_ID) {
            Some(PointVariable::Int(ids)) => ids,
            _ => &[],
        }
    }

    pub fn index_of(&self, agent_id: i64) -> Option<usize> {
        self.agent_ids().iter().position(|&id| id == agent_id)
    }
}
