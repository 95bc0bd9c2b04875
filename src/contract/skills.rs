//! Built-in skill contracts, compiled once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use super::{ContractError, SkillContract};

pub const PLAN: &str = "plan";
pub const DOC_BUNDLE: &str = "doc_bundle";
pub const TEST_PLAN: &str = "test_plan";
pub const REFLECTION: &str = "reflection";

/// Lookup table of skill contracts by name.
#[derive(Debug, Clone, Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<SkillContract>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in skill.
    pub fn builtin() -> Result<Self, ContractError> {
        let mut registry = Self::new();
        registry.register(plan_skill()?);
        registry.register(doc_bundle_skill()?);
        registry.register(test_plan_skill()?);
        registry.register(reflection_skill()?);
        Ok(registry)
    }

    pub fn register(&mut self, contract: SkillContract) {
        self.skills
            .insert(contract.name().to_string(), Arc::new(contract));
    }

    pub fn get(&self, name: &str) -> Option<Arc<SkillContract>> {
        self.skills.get(name).cloned()
    }

    pub fn require(&self, name: &str) -> Result<Arc<SkillContract>, ContractError> {
        self.get(name)
            .ok_or_else(|| ContractError::UnknownSkill(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.skills.keys().cloned().collect();
        names.sort();
        names
    }
}

fn plan_skill() -> Result<SkillContract, ContractError> {
    let step = json!({
        "type": "object",
        "required": ["id", "title", "description", "risk"],
        "properties": {
            "id": {"type": "string", "minLength": 1},
            "title": {"type": "string", "minLength": 1},
            "description": {"type": "string"},
            "risk": {"enum": ["low", "medium", "high"]}
        }
    });
    Ok(SkillContract::new(
        PLAN,
        "Draft an execution plan for a job before any work is done",
        json!({
            "type": "object",
            "required": ["objective"],
            "properties": {"objective": {"type": "string", "minLength": 1}}
        }),
        json!({
            "type": "object",
            "required": ["objective", "scope", "steps", "validationStrategy", "rollbackPlan"],
            "properties": {
                "objective": {"type": "string", "minLength": 1},
                "scope": {"type": "string"},
                "steps": {"type": "array", "minItems": 1, "items": step},
                "constraints": {"type": "array", "items": {"type": "string"}},
                "validationStrategy": {"type": "string"},
                "rollbackPlan": {"type": "string"}
            }
        }),
    )?
    .with_constraints(&[
        "Steps are ordered and each has a stable id",
        "Mark any step that writes to a shared branch as high risk",
    ])
    .with_failure_modes(&["empty_steps", "missing_rollback"]))
}

fn doc_bundle_skill() -> Result<SkillContract, ContractError> {
    Ok(SkillContract::new(
        DOC_BUNDLE,
        "Produce documentation files for the configured targets",
        json!({
            "type": "object",
            "required": ["spec"],
            "properties": {
                "spec": {"type": "string", "minLength": 1},
                "targets": {"type": "array", "items": {"type": "string"}},
                "sources": {"type": "array", "items": {"type": "string"}},
                "depth": {"enum": ["lite", "standard", "deep"]},
                "multiPass": {"type": "boolean"}
            }
        }),
        json!({
            "type": "object",
            "required": ["summary", "files", "coveredTargets"],
            "properties": {
                "summary": {"type": "string", "minLength": 1},
                "files": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "required": ["path", "content"],
                        "properties": {
                            "path": {"type": "string", "minLength": 1},
                            "content": {"type": "string"}
                        }
                    }
                },
                "coveredTargets": {"type": "array", "items": {"type": "string"}}
            }
        }),
    )?
    .with_constraints(&[
        "Every file path is relative to the repository root",
        "coveredTargets only lists targets that a produced file documents",
    ])
    .with_failure_modes(&["no_files", "absolute_path", "uncovered_target"]))
}

fn test_plan_skill() -> Result<SkillContract, ContractError> {
    Ok(SkillContract::new(
        TEST_PLAN,
        "Turn a feature description into a prioritized test plan",
        json!({
            "type": "object",
            "required": ["spec"],
            "properties": {"spec": {"type": "string", "minLength": 1}}
        }),
        json!({
            "type": "object",
            "required": ["summary", "cases"],
            "properties": {
                "summary": {"type": "string", "minLength": 1},
                "cases": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "required": ["id", "title", "steps", "expected", "priority"],
                        "properties": {
                            "id": {"type": "string", "minLength": 1},
                            "title": {"type": "string", "minLength": 1},
                            "steps": {"type": "array", "items": {"type": "string"}},
                            "expected": {"type": "string"},
                            "priority": {"enum": ["low", "medium", "high"]}
                        }
                    }
                }
            }
        }),
    )?
    .with_constraints(&["Each case has at least one step and an observable expectation"])
    .with_failure_modes(&["no_cases", "unobservable_expectation"]))
}

fn reflection_skill() -> Result<SkillContract, ContractError> {
    Ok(SkillContract::new(
        REFLECTION,
        "Critique the output of a finished execution pass",
        json!({"type": "object"}),
        json!({
            "type": "object",
            "required": ["critique", "issues", "confidence"],
            "properties": {
                "critique": {"type": "string"},
                "issues": {"type": "array", "items": {"type": "string"}},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1}
            }
        }),
    )?
    .with_failure_modes(&["confidence_out_of_range"]))
}
