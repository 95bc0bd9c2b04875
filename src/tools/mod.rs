//! Tool system for agents.
//!
//! Tools are the agent's hands on a remote repository: read a file, create
//! a branch, commit a file, open a draft pull request. Adapters surface every
//! failure as a [`ToolError`] whose [`ToolErrorKind`] lets the orchestrator
//! decide between failing the job and degrading gracefully.
//!
//! Agents never call a [`RepoTool`] directly. They go through a
//! [`ToolSession`], which records a `tool_call` trace event before each
//! operation and a `tool_result` event after it.

mod error;
mod fake;
mod publish;
mod session;

pub use error::{ToolError, ToolErrorKind};
pub use fake::{FakeOp, FakePullRequest, FakeRepo};
pub use publish::{publish_files, GeneratedFile, PublishOutcome, PublishRequest};
pub use session::ToolSession;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

/// Typed remote operations on a version-controlled repository.
#[async_trait]
pub trait RepoTool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// Read a file from the default branch. `Ok(None)` if it does not exist.
    async fn read_file(&self, path: &str) -> Result<Option<String>, ToolError>;

    async fn create_branch(&self, branch: &str) -> Result<(), ToolError>;

    /// Commit one file to `branch`, returning the commit id.
    async fn commit_file(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<String, ToolError>;

    /// Open a draft pull request from `branch`, returning its URL.
    async fn create_draft_pr(&self, branch: &str, title: &str, body: &str)
        -> Result<String, ToolError>;
}

/// Registry of available tools.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn RepoTool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn RepoTool>) {
        tracing::debug!(tool = tool.name(), "Registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RepoTool>> {
        self.tools.get(name).cloned()
    }

    /// Pick the tool a job asked for, or the only registered tool when the
    /// job did not name one.
    pub fn resolve(&self, requested: Option<&str>) -> Option<Arc<dyn RepoTool>> {
        match requested {
            Some(name) => self.get(name),
            None if self.tools.len() == 1 => self.tools.values().next().cloned(),
            None => None,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_named_tool_and_falls_back_to_single() {
        let mut registry = ToolRegistry::empty();
        assert!(registry.resolve(None).is_none());

        registry.register(Arc::new(FakeRepo::named("github")));
        assert_eq!(registry.resolve(None).unwrap().name(), "github");
        assert!(registry.resolve(Some("gitlab")).is_none());

        registry.register(Arc::new(FakeRepo::named("gitlab")));
        assert!(registry.resolve(None).is_none());
        assert_eq!(registry.resolve(Some("gitlab")).unwrap().name(), "gitlab");
        assert_eq!(registry.names(), vec!["github", "gitlab"]);
    }
}
