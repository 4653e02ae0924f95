//! Workflow definitions for rover agents.
//!
//! A workflow is a YAML document declaring named inputs and outputs plus an
//! ordered list of steps. Each step may override the tool/model, carries a
//! prompt template, and declares the outputs it produces. Definitions are
//! validated on load; every problem is reported at once so authors can fix a
//! file in a single pass.

pub mod definition;
pub mod validation;

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use definition::{
    InputType, OutputType, StepConfig, StepOutput, Workflow, WorkflowConfig, WorkflowDefaults,
    WorkflowInput, WorkflowOutput, WorkflowStep,
};
pub use validation::validate;

/// Errors raised while loading or saving workflow definitions.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse workflow: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid workflow:\n- {}", .0.join("\n- "))]
    Invalid(Vec<String>),
}

/// Parse and validate a workflow from YAML text.
pub fn from_yaml(contents: &str) -> Result<Workflow, WorkflowError> {
    let workflow: Workflow = serde_yaml::from_str(contents)?;
    let errors = validate(&workflow);
    if !errors.is_empty() {
        return Err(WorkflowError::Invalid(errors));
    }
    Ok(workflow)
}

/// Serialize a workflow to YAML after validating it.
pub fn to_yaml(workflow: &Workflow) -> Result<String, WorkflowError> {
    let errors = validate(workflow);
    if !errors.is_empty() {
        return Err(WorkflowError::Invalid(errors));
    }
    Ok(serde_yaml::to_string(workflow)?)
}

/// Load and validate a workflow file.
pub fn load(path: &Path) -> Result<Workflow, WorkflowError> {
    let contents = fs::read_to_string(path).map_err(|source| WorkflowError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    from_yaml(&contents)
}

/// Validate and write a workflow file.
pub fn save(path: &Path, workflow: &Workflow) -> Result<(), WorkflowError> {
    let contents = to_yaml(workflow)?;
    fs::write(path, contents).map_err(|source| WorkflowError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWE: &str = r#"
version: "1.0"
name: swe
description: Implement a change end to end
inputs:
  - name: description
    description: What to build
    type: string
    required: true
outputs:
  - name: summary
    description: Final summary
    type: file
    filename: summary.md
defaults:
  tool: claude
  model: sonnet
config:
  timeout: 3600
  continueOnError: false
steps:
  - id: plan
    name: Plan the change
    prompt: |
      Plan how to implement: {{inputs.description}}
    outputs:
      - name: plan
        description: The plan
        type: file
        filename: plan.md
  - id: implement
    name: Implement
    tool: codex
    prompt: |
      Follow the plan: {{steps.plan.outputs.plan}}
    outputs:
      - name: summary
        description: What changed
        type: file
        filename: summary.md
    config:
      timeout: 1800
      retries: 2
"#;

    #[test]
    fn loads_valid_workflow() {
        let workflow = from_yaml(SWE).expect("parse");
        assert_eq!(workflow.name, "swe");
        assert_eq!(workflow.steps.len(), 2);
        assert_eq!(workflow.steps[1].tool.as_deref(), Some("codex"));
        assert_eq!(
            workflow.config.as_ref().and_then(|c| c.continue_on_error),
            Some(false)
        );
    }

    #[test]
    fn save_then_load_is_lossless() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("swe.yml");
        let workflow = from_yaml(SWE).expect("parse");

        save(&path, &workflow).expect("save");
        let reloaded = load(&path).expect("load");
        assert_eq!(reloaded, workflow);
    }

    #[test]
    fn invalid_workflow_reports_all_errors() {
        let yaml = r#"
version: "1.0"
name: broken
steps:
  - id: a
    prompt: one
    outputs:
      - name: out
        type: file
  - id: a
    prompt: two
"#;
        let err = from_yaml(yaml).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("duplicate step id 'a'"), "{message}");
        assert!(message.contains("must declare a filename"), "{message}");
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = from_yaml("steps: [").unwrap_err();
        assert!(matches!(err, WorkflowError::Parse(_)));
    }
}
