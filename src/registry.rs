//! Agent definition lookup.
//!
//! A registry is built once and shared as an `Arc`. The driver holds its own
//! snapshot, so replacing the registry never affects runs already in flight.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::agents::{AgentDefinition, OutputMode};

/// One problem found in a set of agent definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub agent_id: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.agent_id, self.message)
    }
}

/// Agent definitions keyed by id.
#[derive(Debug, Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentDefinition>>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a definition. Ids must be lowercase letters, digits and hyphens,
    /// and unique within the registry.
    pub fn register(&mut self, definition: AgentDefinition) -> Result<()> {
        if !is_valid_id(&definition.id) {
            return Err(Error::InvalidAgents(vec![ValidationIssue::new(
                definition.id,
                "id must contain only lowercase letters, digits and hyphens",
            )]));
        }
        if self.agents.contains_key(&definition.id) {
            return Err(Error::InvalidAgents(vec![ValidationIssue::new(
                definition.id,
                "duplicate agent id",
            )]));
        }
        self.agents
            .insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, definition: AgentDefinition) -> Result<Self> {
        self.register(definition)?;
        Ok(self)
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<AgentDefinition>> {
        self.agents.get(agent_id).cloned()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Sorted agent ids.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Check cross-definition consistency. Returns every issue found.
    pub fn validate(&self) -> Result<()> {
        let mut issues = Vec::new();
        for id in self.ids() {
            let Some(def) = self.agents.get(id) else {
                continue;
            };
            for child in &def.spawnable_agents {
                if !self.agents.contains_key(child) {
                    issues.push(ValidationIssue::new(
                        id,
                        format!("spawnable agent {child} is not registered"),
                    ));
                }
            }
            if def.system_prompt.is_some() && def.inherit_parent_system_prompt {
                issues.push(ValidationIssue::new(
                    id,
                    "system_prompt cannot be combined with inherit_parent_system_prompt",
                ));
            }
            if def.output_schema.is_some() && def.output_mode != OutputMode::StructuredOutput {
                issues.push(ValidationIssue::new(
                    id,
                    "output_schema requires output_mode structured_output",
                ));
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            tracing::error!(count = issues.len(), "agent definitions failed validation");
            Err(Error::InvalidAgents(issues))
        }
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_get() {
        let registry = AgentRegistry::new()
            .with(AgentDefinition::new("file-picker", "File Picker"))
            .unwrap();
        assert_eq!(registry.get("file-picker").unwrap().display_name, "File Picker");
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejects_bad_and_duplicate_ids() {
        let mut registry = AgentRegistry::new();
        assert!(matches!(
            registry.register(AgentDefinition::new("File_Picker", "")),
            Err(Error::InvalidAgents(_))
        ));
        registry.register(AgentDefinition::new("editor", "")).unwrap();
        let err = registry.register(AgentDefinition::new("editor", "")).unwrap_err();
        assert!(err.to_string().contains("duplicate agent id"));
    }

    #[test]
    fn validate_reports_every_issue() {
        let mut parent = AgentDefinition::new("parent", "");
        parent.spawnable_agents = vec!["ghost".into()];
        parent.system_prompt = Some("be nice".into());
        parent.inherit_parent_system_prompt = true;

        let mut child = AgentDefinition::new("child", "");
        child.output_schema = Some(serde_json::json!({"type": "object"}));

        let registry = AgentRegistry::new().with(parent).unwrap().with(child).unwrap();
        match registry.validate() {
            Err(Error::InvalidAgents(issues)) => {
                assert_eq!(issues.len(), 3);
                assert_eq!(issues[0].agent_id, "child");
                assert!(issues[1].message.contains("ghost"));
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn valid_registry_passes() {
        let mut parent = AgentDefinition::new("parent", "");
        parent.spawnable_agents = vec!["child".into()];
        let mut child = AgentDefinition::new("child", "");
        child.output_mode = OutputMode::StructuredOutput;
        child.output_schema = Some(serde_json::json!({"type": "object"}));
        let registry = AgentRegistry::new().with(parent).unwrap().with(child).unwrap();
        registry.validate().unwrap();
        assert_eq!(registry.ids(), vec!["child", "parent"]);
    }
}
