//! Agents module - polymorphic job executors.
//!
//! # Agent Kinds
//! - **DocsAgent** (`docs`): plans, writes documentation, reflects, publishes
//!   a draft pull request through a repository tool
//! - **TestPlanAgent** (`test_plan`): playbook-driven, no planning or reflection
//!
//! Agents share a capability interface, not an implementation. A kind
//! declares which optional phases it supports in its [`AgentDescriptor`]
//! and overrides only those trait methods; the defaults mean "capability
//! absent".

mod context;
pub mod docs;
pub mod planner;
pub mod test_plan;
mod types;

pub use context::AgentContext;
pub use docs::DocsAgent;
pub use planner::Planner;
pub use test_plan::TestPlanAgent;
pub use types::{AgentDescriptor, AgentError, AgentOutput, ContractCheck, Reflection};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::job::{Job, Plan};
use crate::tools::ToolSession;

/// Capability set every agent kind conforms to.
///
/// # Invariants
/// - `execute()` and `execute_with_tools()` never panic; all errors are returned as `Err`
/// - an agent never changes job state; the orchestrator owns the lifecycle
#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> AgentDescriptor;

    /// Produce a plan. Called only when the descriptor sets `requires_planning`.
    async fn plan(
        &self,
        _ctx: &AgentContext,
        _job: &Job,
        _planner: &Planner,
    ) -> Result<Option<Plan>, AgentError> {
        Ok(None)
    }

    /// Execute without external tools.
    async fn execute(&self, ctx: &AgentContext, job: &Job) -> Result<AgentOutput, AgentError>;

    /// Execute with an optional tool session and the approved plan. Called
    /// instead of `execute` when the descriptor sets `uses_tools`.
    async fn execute_with_tools(
        &self,
        ctx: &AgentContext,
        job: &Job,
        _tools: Option<ToolSession>,
        _plan: Option<&Plan>,
    ) -> Result<AgentOutput, AgentError> {
        self.execute(ctx, job).await
    }

    /// Critique a finished execution. Called only when the descriptor sets
    /// `requires_reflection`.
    async fn reflect(
        &self,
        _ctx: &AgentContext,
        _job: &Job,
        _output: &AgentOutput,
    ) -> Result<Option<Reflection>, AgentError> {
        Ok(None)
    }
}

/// Registry of agent kinds, keyed by job `type`.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in agent kind.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(DocsAgent));
        registry.register(Arc::new(TestPlanAgent));
        registry
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        let kind = agent.descriptor().kind;
        self.agents.insert(kind.to_string(), agent);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(kind).cloned()
    }

    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        let mut descriptors: Vec<_> = self.agents.values().map(|a| a.descriptor()).collect();
        descriptors.sort_by_key(|d| d.kind);
        descriptors
    }
}
