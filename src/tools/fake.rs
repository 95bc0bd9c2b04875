//! In-memory repository with scripted failures.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;

use super::{RepoTool, ToolError, ToolErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    ReadFile,
    CreateBranch,
    CommitFile,
    CreateDraftPr,
}

impl FakeOp {
    fn as_str(&self) -> &'static str {
        match self {
            FakeOp::ReadFile => "read_file",
            FakeOp::CreateBranch => "create_branch",
            FakeOp::CommitFile => "commit_file",
            FakeOp::CreateDraftPr => "create_draft_pr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakePullRequest {
    pub branch: String,
    pub title: String,
    pub body: String,
    pub url: String,
}

#[derive(Default)]
struct FakeState {
    files: HashMap<String, String>,
    branches: HashMap<String, HashMap<String, String>>,
    pull_requests: Vec<FakePullRequest>,
    failures: HashMap<FakeOp, ToolErrorKind>,
    calls: Vec<String>,
    commits: u32,
}

/// A repository held in memory. Operations listed with [`FakeRepo::fail`]
/// return the scripted error every time they are called.
pub struct FakeRepo {
    name: String,
    state: StdMutex<FakeState>,
}

impl FakeRepo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StdMutex::new(FakeState::default()),
        }
    }

    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.lock().files.insert(path.to_string(), content.to_string());
        self
    }

    pub fn fail(self, op: FakeOp, kind: ToolErrorKind) -> Self {
        self.lock().failures.insert(op, kind);
        self
    }

    /// Operations called so far, as `"op path_or_branch"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn branch_files(&self, branch: &str) -> Option<HashMap<String, String>> {
        self.lock().branches.get(branch).cloned()
    }

    pub fn pull_requests(&self) -> Vec<FakePullRequest> {
        self.lock().pull_requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, op: FakeOp, target: &str) -> Result<std::sync::MutexGuard<'_, FakeState>, ToolError> {
        let mut state = self.lock();
        state.calls.push(format!("{} {}", op.as_str(), target));
        if let Some(kind) = state.failures.get(&op).copied() {
            return Err(ToolError::new(
                self.name.clone(),
                op.as_str(),
                kind,
                format!("scripted {} failure", kind),
            ));
        }
        Ok(state)
    }
}

#[async_trait]
impl RepoTool for FakeRepo {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>, ToolError> {
        let state = self.enter(FakeOp::ReadFile, path)?;
        Ok(state.files.get(path).cloned())
    }

    async fn create_branch(&self, branch: &str) -> Result<(), ToolError> {
        let mut state = self.enter(FakeOp::CreateBranch, branch)?;
        if state.branches.contains_key(branch) {
            return Err(ToolError::new(
                self.name.clone(),
                "create_branch",
                ToolErrorKind::Protocol,
                format!("branch '{}' already exists", branch),
            ));
        }
        let base = state.files.clone();
        state.branches.insert(branch.to_string(), base);
        Ok(())
    }

    async fn commit_file(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        _message: &str,
    ) -> Result<String, ToolError> {
        let mut state = self.enter(FakeOp::CommitFile, path)?;
        state.commits += 1;
        let commit_id = format!("{:07x}", state.commits);
        let files = state.branches.get_mut(branch).ok_or_else(|| {
            ToolError::new(
                self.name.clone(),
                "commit_file",
                ToolErrorKind::Protocol,
                format!("unknown branch '{}'", branch),
            )
        })?;
        files.insert(path.to_string(), content.to_string());
        Ok(commit_id)
    }

    async fn create_draft_pr(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<String, ToolError> {
        let mut state = self.enter(FakeOp::CreateDraftPr, branch)?;
        let url = format!(
            "https://example.invalid/{}/pull/{}",
            self.name,
            state.pull_requests.len() + 1
        );
        state.pull_requests.push(FakePullRequest {
            branch: branch.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            url: url.clone(),
        });
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commits_land_on_the_branch_only() {
        let repo = FakeRepo::named("github").with_file("README.md", "old");
        repo.create_branch("docs").await.unwrap();
        repo.commit_file("docs", "README.md", "new", "update").await.unwrap();

        assert_eq!(repo.read_file("README.md").await.unwrap().as_deref(), Some("old"));
        assert_eq!(repo.branch_files("docs").unwrap()["README.md"], "new");
    }

    #[tokio::test]
    async fn scripted_failure_is_returned_and_logged() {
        let repo = FakeRepo::named("github").fail(FakeOp::CreateBranch, ToolErrorKind::Unauthorized);
        let err = repo.create_branch("docs").await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Unauthorized);
        assert_eq!(repo.calls(), vec!["create_branch docs"]);
    }
}
