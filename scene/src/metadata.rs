//! Per-agent metadata overrides written into crowd point variables.

use std::collections::BTreeMap;

use crate::agent::{AgentRecord, Crowd};
use crate::attributes::{AttributeValue, Attributes};
use crate::points::{CrowdPoints, PointVariable};
use crate::selector::{AgentSelector, SelectorError};

/// Writes `overrides` as `atoms:<key>` point variables on the agents picked
/// by `agent_ids`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataOverlay {
    /// Selection expression over agent ids, see [`AgentSelector`].
    pub agent_ids: String,
    pub invert: bool,
    pub overrides: Attributes,
}

impl MetadataOverlay {
    pub fn new(agent_ids: impl Into<String>) -> Self {
        Self {
            agent_ids: agent_ids.into(),
            ..Default::default()
        }
    }

    pub fn inverted(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.overrides.insert(key.into(), value);
        self
    }

    /// Returns `points` with the overrides applied.
    ///
    /// A key without a column yet gets a new one filled with the type
    /// default, or with the agent's own metadata value of the same type
    /// when `agents` has one. An existing column of a different type is left
    /// untouched.
    pub fn apply(
        &self,
        points: &CrowdPoints,
        agents: &BTreeMap<i64, AgentRecord>,
    ) -> Result<CrowdPoints, SelectorError> {
        let selector = AgentSelector::parse(&self.agent_ids)?;
        let ids = points.agent_ids().to_vec();
        let selected = selector.select(&ids, self.invert);

        let mut out = points.clone();
        for (key, value) in &self.overrides {
            let name = format!("atoms:{}", key);
            if out.variable(&name).is_none() {
                let Some(column) = initial_column(key, value, &ids, agents) else {
                    log::warn!("Metadata '{}' of type {} cannot be stored per agent", key, value.type_name());
                    continue;
                };
                out.insert_variable(name.clone(), column);
            }
            let Some(column) = out.variable_mut(&name) else { continue };
            for (index, id) in ids.iter().enumerate() {
                if selected.contains(id) && !column.set(index, value) {
                    log::warn!("Metadata '{}' does not match the existing {} column", key, name);
                    break;
                }
            }
        }
        Ok(out)
    }

    /// [`apply`](Self::apply) on a whole crowd.
    pub fn apply_to_crowd(&self, crowd: &Crowd) -> Result<Crowd, SelectorError> {
        Ok(crowd.with_points(self.apply(&crowd.points, &crowd.agents)?))
    }
}

fn initial_column(
    key: &str,
    value: &AttributeValue,
    ids: &[i64],
    agents: &BTreeMap<i64, AgentRecord>,
) -> Option<PointVariable> {
    let mut column = PointVariable::filled(&value.type_default(), ids.len())?;
    for (index, id) in ids.iter().enumerate() {
        if let Some(existing) = agents
            .get(id)
            .and_then(|record| record.metadata.get(key))
            .filter(|existing| existing.same_kind(value))
        {
            column.set(index, existing);
        }
    }
    Some(column)
}
