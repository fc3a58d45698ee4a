use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::diff::unified_diff;
use super::{new_tool, parse_input, Tool, ToolSet};
use crate::types::tools::ToolResult;

/// Files under one root directory, plus the per-run proposal overlays.
///
/// Proposal tools never touch disk. Each run gets its own overlay so a later
/// proposal in the same run sees the earlier ones, while sibling runs stay
/// isolated from each other.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    proposals: Mutex<HashMap<String, HashMap<String, String>>>,
}

#[derive(Debug, Deserialize)]
struct ReadFilesInput {
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WriteFileInput {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StrReplaceInput {
    path: String,
    replacements: Vec<Replacement>,
}

#[derive(Debug, Deserialize)]
struct Replacement {
    old: String,
    new: String,
    #[serde(default)]
    allow_multiple: bool,
}

impl Workspace {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            root: root.into(),
            proposals: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register the file tools and the overlay release hook on `set`.
    pub fn install(self: &Arc<Self>, set: &mut ToolSet) {
        set.extend(self.tools());
        let ws = self.clone();
        set.on_release(Arc::new(move |run_id| {
            let ws = ws.clone();
            Box::pin(async move {
                ws.proposals.lock().await.remove(&run_id);
            })
        }));
    }

    /// `read_files`, `write_file`, `str_replace` and their proposal shadows.
    pub fn tools(self: &Arc<Self>) -> Vec<Tool> {
        let path_schema = serde_json::json!({"type": "string", "description": "Path relative to the project root"});
        let write_schema = serde_json::json!({
            "type": "object",
            "properties": {"path": path_schema, "content": {"type": "string"}},
            "required": ["path", "content"]
        });
        let replace_schema = serde_json::json!({
            "type": "object",
            "properties": {
                "path": path_schema,
                "replacements": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "old": {"type": "string"},
                            "new": {"type": "string"},
                            "allow_multiple": {"type": "boolean"}
                        },
                        "required": ["old", "new"]
                    }
                }
            },
            "required": ["path", "replacements"]
        });

        let ws = self.clone();
        let read = new_tool(
            "read_files",
            "Read one or more files",
            serde_json::json!({
                "type": "object",
                "properties": {"paths": {"type": "array", "items": path_schema}},
                "required": ["paths"]
            }),
            move |input, _ctx| {
                let ws = ws.clone();
                async move { ws.read_files(input).await }
            },
        );

        let ws = self.clone();
        let write = new_tool(
            "write_file",
            "Create or overwrite a file",
            write_schema.clone(),
            move |input, _ctx| {
                let ws = ws.clone();
                async move { ws.write_file(input).await }
            },
        );

        let ws = self.clone();
        let replace = new_tool(
            "str_replace",
            "Replace exact strings in a file",
            replace_schema.clone(),
            move |input, _ctx| {
                let ws = ws.clone();
                async move { ws.str_replace(input).await }
            },
        );

        let ws = self.clone();
        let propose_write = new_tool(
            "propose_write_file",
            "Draft a file write without applying it",
            write_schema,
            move |input, ctx| {
                let ws = ws.clone();
                async move { ws.propose_write_file(&ctx.run_id, input).await }
            },
        );

        let ws = self.clone();
        let propose_replace = new_tool(
            "propose_str_replace",
            "Draft string replacements without applying them",
            replace_schema,
            move |input, ctx| {
                let ws = ws.clone();
                async move { ws.propose_str_replace(&ctx.run_id, input).await }
            },
        );

        vec![read, write, replace, propose_write, propose_replace]
    }

    /// Resolve a relative path under the root, refusing escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let rel = Path::new(path);
        if path.is_empty() || rel.is_absolute() {
            return Err(format!("path must be relative to the project root: {path}"));
        }
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(format!("path escapes the project root: {path}")),
            }
        }
        Ok(self.root.join(rel))
    }

    async fn read_disk(&self, path: &str) -> Result<Option<String>, String> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(format!("failed to read {path}: {e}")),
        }
    }

    async fn write_disk(&self, path: &str, content: &str) -> Result<(), String> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("failed to create directories for {path}: {e}"))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| format!("failed to write {path}: {e}"))
    }

    async fn read_files(&self, input: Value) -> Vec<ToolResult> {
        let input: ReadFilesInput = match parse_input(input) {
            Ok(input) => input,
            Err(err) => return err,
        };
        let mut files = serde_json::Map::new();
        for path in input.paths {
            let value = match self.read_disk(&path).await {
                Ok(Some(content)) => Value::String(content),
                Ok(None) => Value::Null,
                Err(e) => return vec![ToolResult::error(e)],
            };
            files.insert(path, value);
        }
        vec![ToolResult::json(Value::Object(files))]
    }

    async fn write_file(&self, input: Value) -> Vec<ToolResult> {
        let input: WriteFileInput = match parse_input(input) {
            Ok(input) => input,
            Err(err) => return err,
        };
        let old = match self.read_disk(&input.path).await {
            Ok(old) => old.unwrap_or_default(),
            Err(e) => return vec![ToolResult::error(e)],
        };
        if let Err(e) = self.write_disk(&input.path, &input.content).await {
            return vec![ToolResult::error(e)];
        }
        tracing::debug!(path = %input.path, "wrote file");
        vec![change_result(&input.path, "Wrote file", &old, &input.content)]
    }

    async fn str_replace(&self, input: Value) -> Vec<ToolResult> {
        let input: StrReplaceInput = match parse_input(input) {
            Ok(input) => input,
            Err(err) => return err,
        };
        let old = match self.read_disk(&input.path).await {
            Ok(Some(old)) => old,
            Ok(None) => return vec![ToolResult::error(format!("file not found: {}", input.path))],
            Err(e) => return vec![ToolResult::error(e)],
        };
        let new = match apply_replacements(&input.path, &old, &input.replacements) {
            Ok(new) => new,
            Err(e) => return vec![ToolResult::error(e)],
        };
        if let Err(e) = self.write_disk(&input.path, &new).await {
            return vec![ToolResult::error(e)];
        }
        tracing::debug!(path = %input.path, "replaced strings in file");
        vec![change_result(&input.path, "Updated file", &old, &new)]
    }

    /// Current content of `path` as seen by `run_id`'s proposals.
    async fn proposed_content(&self, run_id: &str, path: &str) -> Result<Option<String>, String> {
        let overlay = self
            .proposals
            .lock()
            .await
            .get(run_id)
            .and_then(|files| files.get(path).cloned());
        match overlay {
            Some(content) => Ok(Some(content)),
            None => self.read_disk(path).await,
        }
    }

    async fn store_proposal(&self, run_id: &str, path: &str, content: String) {
        self.proposals
            .lock()
            .await
            .entry(run_id.to_string())
            .or_default()
            .insert(path.to_string(), content);
    }

    async fn propose_write_file(&self, run_id: &str, input: Value) -> Vec<ToolResult> {
        let input: WriteFileInput = match parse_input(input) {
            Ok(input) => input,
            Err(err) => return err,
        };
        let old = match self.proposed_content(run_id, &input.path).await {
            Ok(old) => old.unwrap_or_default(),
            Err(e) => return vec![ToolResult::error(e)],
        };
        let result = change_result(&input.path, "Proposed file write", &old, &input.content);
        self.store_proposal(run_id, &input.path, input.content).await;
        vec![result]
    }

    async fn propose_str_replace(&self, run_id: &str, input: Value) -> Vec<ToolResult> {
        let input: StrReplaceInput = match parse_input(input) {
            Ok(input) => input,
            Err(err) => return err,
        };
        let old = match self.proposed_content(run_id, &input.path).await {
            Ok(Some(old)) => old,
            Ok(None) => return vec![ToolResult::error(format!("file not found: {}", input.path))],
            Err(e) => return vec![ToolResult::error(e)],
        };
        let new = match apply_replacements(&input.path, &old, &input.replacements) {
            Ok(new) => new,
            Err(e) => return vec![ToolResult::error(e)],
        };
        let result = change_result(&input.path, "Proposed replacements", &old, &new);
        self.store_proposal(run_id, &input.path, new).await;
        vec![result]
    }
}

fn apply_replacements(path: &str, content: &str, replacements: &[Replacement]) -> Result<String, String> {
    let mut content = content.to_string();
    for rep in replacements {
        if rep.old.is_empty() {
            return Err(format!("empty search string for {path}"));
        }
        let count = content.matches(&rep.old).count();
        if count == 0 {
            return Err(format!("string not found in {path}: {:?}", rep.old));
        }
        if count > 1 && !rep.allow_multiple {
            return Err(format!(
                "string occurs {count} times in {path}; set allow_multiple to replace all: {:?}",
                rep.old
            ));
        }
        content = content.replace(&rep.old, &rep.new);
    }
    Ok(content)
}

fn change_result(path: &str, message: &str, old: &str, new: &str) -> ToolResult {
    ToolResult::json(serde_json::json!({
        "file": path,
        "message": message,
        "unified_diff": unified_diff(path, old, new),
    }))
}
