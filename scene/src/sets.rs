use std::collections::{BTreeMap, BTreeSet};

use crate::path::ScenePath;
use crate::template::AgentTemplate;

/// Named sets of leaf paths, accumulated agent by agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetBuilder {
    sets: BTreeMap<String, BTreeSet<ScenePath>>,
}

impl SetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an agent's leaves to `<type>`, `<type>:<variation>`,
    /// `<type>:<variation>:<lod>` (when `lod` is set) and to every set the
    /// template declares on the leaf or one of its ancestors.
    pub fn add_agent(
        &mut self,
        agent_path: &ScenePath,
        agent_type: &str,
        variation: &str,
        lod: &str,
        template: &AgentTemplate,
    ) {
        let mut names = vec![agent_type.to_string(), format!("{}:{}", agent_type, variation)];
        if !lod.is_empty() {
            names.push(format!("{}:{}:{}", agent_type, variation, lod));
        }

        let leaves = template.leaves();
        if leaves.is_empty() {
            for name in &names {
                self.insert(name, agent_path.clone());
            }
            return;
        }

        for leaf in leaves {
            let path = agent_path.join(leaf.path.segments());
            for name in names.iter().chain(leaf.sets.iter()) {
                self.insert(name, path.clone());
            }
        }
    }

    fn insert(&mut self, name: &str, path: ScenePath) {
        self.sets.entry(name.to_string()).or_default().insert(path);
    }

    pub fn build(self) -> BTreeMap<String, BTreeSet<ScenePath>> {
        self.sets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use crate::template::TemplatePart;

    #[test]
    fn test_sets_from_agent() {
        let template = AgentTemplate::new(
            "robot",
            "V1",
            BTreeMap::from([
                ("body".to_string(), TemplatePart::mesh(Mesh::default()).with_set("metal")),
                ("head".to_string(), TemplatePart::mesh(Mesh::default())),
            ]),
        );
        let mut builder = SetBuilder::new();
        builder.add_agent(&ScenePath::parse("/crowd/agents/robot/V1:A/5"), "robot", "V1", "A", &template);
        let sets = builder.build();

        assert_eq!(sets["robot"].len(), 2);
        assert_eq!(sets["robot:V1"].len(), 2);
        assert_eq!(sets["robot:V1:A"].len(), 2);
        assert_eq!(
            sets["metal"].iter().cloned().collect::<Vec<_>>(),
            vec![ScenePath::parse("/crowd/agents/robot/V1:A/5/body")]
        );
    }

    #[test]
    fn test_partless_agent_is_its_own_leaf() {
        let template = AgentTemplate::new("robot", "V1", BTreeMap::new());
        let mut builder = SetBuilder::new();
        let path = ScenePath::parse("/crowd/agents/robot/V1/1");
        builder.add_agent(&path, "robot", "V1", "", &template);
        let sets = builder.build();
        assert!(sets["robot"].contains(&path));
        assert!(!sets.contains_key("robot:V1:"));
    }
}
