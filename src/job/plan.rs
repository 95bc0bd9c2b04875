//! Approval plan attached to a job.
//!
//! A plan is created once per job by agents that require planning. After
//! creation only evidence statuses change, as validation steps finish.

use serde::{Deserialize, Serialize};

use super::record::JobId;

/// Risk level of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Low,
    Medium,
    High,
}

impl Risk {
    pub fn as_str(&self) -> &'static str {
        match self {
            Risk::Low => "low",
            Risk::Medium => "medium",
            Risk::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub title: String,
    pub description: String,
    pub risk: Risk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStatus {
    Pending,
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub name: String,
    pub status: EvidenceStatus,
}

impl EvidenceItem {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: EvidenceStatus::Pending,
        }
    }
}

/// The structured plan as produced by the planning skill, before the
/// orchestrator decides on approval and renders it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDraft {
    pub objective: String,
    pub scope: String,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub constraints: Vec<String>,
    pub validation_strategy: String,
    pub rollback_plan: String,
}

/// An approval artifact tied 1:1 to a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub job_id: JobId,
    pub objective: String,
    pub scope: String,
    pub steps: Vec<PlanStep>,
    pub constraints: Vec<String>,
    pub validation_strategy: String,
    pub rollback_plan: String,
    /// Disclosure of how AI is used to carry out the plan
    pub ai_usage: String,
    pub evidence: Vec<EvidenceItem>,
    pub requires_approval: bool,
    /// Rendered form, regenerated whenever evidence changes
    pub markdown: String,
}

/// Names of the evidence items every plan tracks.
pub const EVIDENCE_CONTRACT: &str = "Output matches skill contract";
pub const EVIDENCE_ARTIFACTS: &str = "Artifacts produced";
pub const EVIDENCE_QUALITY: &str = "Quality score computed";
pub const EVIDENCE_PUBLISHED: &str = "Changes published";

impl Plan {
    /// Build a plan from a validated draft.
    ///
    /// # Postconditions
    /// - `requires_approval` is true if `approval_requested` or any step is high risk
    /// - every evidence item starts `Pending`
    pub fn from_draft(
        job_id: JobId,
        draft: PlanDraft,
        ai_usage: impl Into<String>,
        approval_requested: bool,
    ) -> Self {
        let high_risk = draft.steps.iter().any(|s| s.risk == Risk::High);
        let mut plan = Self {
            job_id,
            objective: draft.objective,
            scope: draft.scope,
            steps: draft.steps,
            constraints: draft.constraints,
            validation_strategy: draft.validation_strategy,
            rollback_plan: draft.rollback_plan,
            ai_usage: ai_usage.into(),
            evidence: [
                EVIDENCE_CONTRACT,
                EVIDENCE_ARTIFACTS,
                EVIDENCE_QUALITY,
                EVIDENCE_PUBLISHED,
            ]
            .into_iter()
            .map(EvidenceItem::pending)
            .collect(),
            requires_approval: approval_requested || high_risk,
            markdown: String::new(),
        };
        plan.markdown = plan.render_markdown();
        plan
    }

    /// Update one evidence status. Returns `false` if no item has that name.
    pub fn set_evidence(&mut self, name: &str, status: EvidenceStatus) -> bool {
        let Some(item) = self.evidence.iter_mut().find(|e| e.name == name) else {
            return false;
        };
        item.status = status;
        self.markdown = self.render_markdown();
        true
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Plan: {}\n\n", self.objective));
        out.push_str(&format!("**Scope:** {}\n\n", self.scope));

        out.push_str("## Steps\n\n");
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!(
                "{}. **{}** (`{}`, risk: {})\n   {}\n",
                i + 1,
                step.title,
                step.id,
                step.risk.as_str(),
                step.description
            ));
        }

        if !self.constraints.is_empty() {
            out.push_str("\n## Constraints\n\n");
            for c in &self.constraints {
                out.push_str(&format!("- {}\n", c));
            }
        }

        out.push_str(&format!(
            "\n## Validation\n\n{}\n\n## Rollback\n\n{}\n\n## AI usage\n\n{}\n\n## Evidence\n\n",
            self.validation_strategy, self.rollback_plan, self.ai_usage
        ));
        for item in &self.evidence {
            let mark = match item.status {
                EvidenceStatus::Passed => "[x]",
                EvidenceStatus::Failed => "[!]",
                EvidenceStatus::Skipped => "[-]",
                EvidenceStatus::Pending => "[ ]",
            };
            out.push_str(&format!("- {} {}\n", mark, item.name));
        }

        if self.requires_approval {
            out.push_str("\n> This plan requires approval before execution.\n");
        }
        out
    }
}
