//! Built-in agent definitions.
//!
//! Each submodule exposes constructor functions returning an
//! [`AgentDefinition`], plus the step program that drives it. Agents without
//! a program are plain model loops that finish through `set_output` or
//! `end_turn`.

mod base;
mod editor;
mod thinker;

pub use base::{base, context_pruner, prune_tool_results, PRUNED_TOOL_RESULT};
pub use editor::{best_of_n_selector, editor_implementor, editor_multi_prompt, ProposalLog};
pub use thinker::{strip_think_blocks, thinker_best_of_n, thinker_selector};

use crate::error::Result;
use crate::registry::AgentRegistry;
use crate::types::agents::AgentDefinition;

/// Every built-in definition, in registration order.
pub fn builtin_agents() -> Vec<AgentDefinition> {
    vec![
        base(),
        context_pruner(),
        editor_multi_prompt(),
        editor_implementor(),
        best_of_n_selector(),
        thinker_best_of_n(),
        thinker_selector(),
    ]
}

/// A validated registry holding the built-in agents.
pub fn builtin_registry() -> Result<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    for definition in builtin_agents() {
        registry.register(definition)?;
    }
    registry.validate()?;
    Ok(registry)
}
