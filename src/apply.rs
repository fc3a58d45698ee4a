//! Replaying a proposal log as real tool calls.
//!
//! Candidates draft their edits with proposal tools, which share the input
//! shape of the real tools but never touch disk. Applying a candidate maps
//! each recorded call to its real counterpart and runs the result in order.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::error::Result;
use crate::program::StepContext;
use crate::types::tools::{ToolCall, ToolResult};

/// Errors raised while planning a replay. Nothing has been applied when one
/// of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error("recorded call {position} uses tool {tool_name}, which has no real counterpart")]
    UnmappedTool { tool_name: String, position: usize },

    #[error("recorded call {position} replays as {tool_name}, which this agent may not call")]
    NotPermitted { tool_name: String, position: usize },

    #[error("tool {0} is already part of a mapping")]
    DuplicateMapping(String),
}

/// One-to-one mapping from proposal tools to the real tools they shadow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalMap {
    mappings: BTreeMap<String, String>,
    passthrough: BTreeSet<String>,
}

impl Default for ProposalMap {
    fn default() -> Self {
        Self {
            mappings: BTreeMap::from([
                ("propose_write_file".to_string(), "write_file".to_string()),
                ("propose_str_replace".to_string(), "str_replace".to_string()),
            ]),
            passthrough: BTreeSet::new(),
        }
    }
}

impl ProposalMap {
    /// A map with no mappings at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            mappings: BTreeMap::new(),
            passthrough: BTreeSet::new(),
        }
    }

    /// Add `proposal -> real`. Both names must be new to the map so the
    /// mapping stays injective.
    pub fn with_mapping(
        mut self,
        proposal: impl Into<String>,
        real: impl Into<String>,
    ) -> std::result::Result<Self, ApplyError> {
        let (proposal, real) = (proposal.into(), real.into());
        for name in [&proposal, &real] {
            if self.mappings.contains_key(name) || self.mappings.values().any(|r| r == name) {
                return Err(ApplyError::DuplicateMapping(name.clone()));
            }
        }
        self.mappings.insert(proposal, real);
        Ok(self)
    }

    /// Let `tool_name` through unchanged even though it is not a real tool
    /// of this map.
    #[must_use]
    pub fn allow_passthrough(mut self, tool_name: impl Into<String>) -> Self {
        self.passthrough.insert(tool_name.into());
        self
    }

    pub fn real_for(&self, proposal: &str) -> Option<&str> {
        self.mappings.get(proposal).map(String::as_str)
    }

    /// Real tool names, i.e. the codomain of the mapping.
    pub fn real_tools(&self) -> impl Iterator<Item = &str> {
        self.mappings.values().map(String::as_str)
    }

    pub fn proposal_tools(&self) -> impl Iterator<Item = &str> {
        self.mappings.keys().map(String::as_str)
    }

    /// Name to replay `tool_name` as, if it may be replayed at all.
    pub fn resolve<'a>(&'a self, tool_name: &'a str) -> Option<&'a str> {
        if let Some(real) = self.real_for(tool_name) {
            return Some(real);
        }
        let known = self.real_tools().any(|r| r == tool_name) || self.passthrough.contains(tool_name);
        known.then_some(tool_name)
    }
}

/// Map every recorded call to the call to replay.
///
/// The whole log is checked first, so an unmapped tool anywhere rejects the
/// replay before any call runs.
pub fn plan_replay(
    map: &ProposalMap,
    recorded: &[ToolCall],
) -> std::result::Result<Vec<ToolCall>, ApplyError> {
    recorded
        .iter()
        .enumerate()
        .map(|(position, call)| match map.resolve(&call.tool_name) {
            Some(real) => Ok(ToolCall::new(real, call.input.clone())),
            None => Err(ApplyError::UnmappedTool {
                tool_name: call.tool_name.clone(),
                position,
            }),
        })
        .collect()
}

/// Check a planned replay against the tools the replaying agent may call.
///
/// Run this before [`replay`]: a call the agent may not make would otherwise
/// fail the run after the earlier calls had already landed.
pub fn ensure_permitted(
    plan: &[ToolCall],
    allows: impl Fn(&str) -> bool,
) -> std::result::Result<(), ApplyError> {
    match plan.iter().position(|call| !allows(&call.tool_name)) {
        Some(position) => Err(ApplyError::NotPermitted {
            tool_name: plan[position].tool_name.clone(),
            position,
        }),
        None => Ok(()),
    }
}

/// Something that can execute a tool call and hand back its results.
#[async_trait]
pub trait ToolSink: Send {
    async fn call_tool(&mut self, call: ToolCall) -> Result<Vec<ToolResult>>;
}

#[async_trait]
impl ToolSink for StepContext {
    async fn call_tool(&mut self, call: ToolCall) -> Result<Vec<ToolResult>> {
        Ok(self.tool(call).await?.tool_result)
    }
}

/// Run `calls` one at a time, in order, collecting each call's results.
///
/// Calls are sequential because a later edit may depend on an earlier one
/// having landed.
pub async fn replay<S: ToolSink + ?Sized>(
    sink: &mut S,
    calls: Vec<ToolCall>,
) -> Result<Vec<Vec<ToolResult>>> {
    let mut applied = Vec::with_capacity(calls.len());
    for call in calls {
        tracing::debug!(tool = %call.tool_name, "replaying recorded call");
        applied.push(sink.call_tool(call).await?);
    }
    Ok(applied)
}
