//! Semantic checks for workflow documents that serde cannot express.

use std::collections::{HashMap, HashSet};

use crate::definition::{OutputType, Workflow};

/// Check a workflow and return every violation found:
/// - `version`, `name`, step `id` and step `prompt` are non-empty
/// - step ids and input names are unique
/// - file outputs (workflow or step level) declare a `filename`
/// - `{{inputs.X}}` references a declared input
/// - `{{steps.S.outputs.O}}` references an output of an earlier step
pub fn validate(workflow: &Workflow) -> Vec<String> {
    let mut errors = Vec::new();

    if workflow.version.trim().is_empty() {
        errors.push("missing required field 'version'".to_string());
    }
    if workflow.name.trim().is_empty() {
        errors.push("missing required field 'name'".to_string());
    }
    if workflow.steps.is_empty() {
        errors.push("workflow must declare at least one step".to_string());
    }

    let mut inputs = HashSet::new();
    for input in &workflow.inputs {
        if !inputs.insert(input.name.as_str()) {
            errors.push(format!("duplicate input '{}'", input.name));
        }
    }

    for output in &workflow.outputs {
        if output.kind == OutputType::File && output.filename.is_none() {
            errors.push(format!(
                "output '{}': file outputs must declare a filename",
                output.name
            ));
        }
    }

    // Outputs visible to a step are those of the steps before it.
    let mut available: HashMap<&str, HashSet<&str>> = HashMap::new();
    for (index, step) in workflow.steps.iter().enumerate() {
        let label = if step.id.is_empty() {
            format!("steps[{index}]")
        } else {
            format!("step '{}'", step.id)
        };

        if step.id.trim().is_empty() {
            errors.push(format!("{label}: missing required field 'id'"));
        } else if available.contains_key(step.id.as_str()) {
            errors.push(format!("duplicate step id '{}'", step.id));
        }
        if step.prompt.trim().is_empty() {
            errors.push(format!("{label}: missing required field 'prompt'"));
        }

        for output in &step.outputs {
            if output.kind == OutputType::File && output.filename.is_none() {
                errors.push(format!(
                    "{label}: output '{}' is a file and must declare a filename",
                    output.name
                ));
            }
        }

        for reference in placeholders(&step.prompt) {
            if let Some(err) = check_reference(reference, &inputs, &available) {
                errors.push(format!("{label}: {err}"));
            }
        }

        available
            .entry(step.id.as_str())
            .or_insert_with(|| step.outputs.iter().map(|o| o.name.as_str()).collect());
    }

    errors
}

/// Extract the trimmed contents of every `{{ ... }}` placeholder.
fn placeholders(template: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        found.push(after[..end].trim());
        rest = &after[end + 2..];
    }
    found
}

fn check_reference(
    reference: &str,
    inputs: &HashSet<&str>,
    available: &HashMap<&str, HashSet<&str>>,
) -> Option<String> {
    let parts: Vec<&str> = reference.split('.').collect();
    match parts.as_slice() {
        ["inputs", name] if !inputs.contains(name) => {
            Some(format!("references unknown input '{name}'"))
        }
        ["steps", step, "outputs", output] => match available.get(step) {
            None => Some(format!("references unknown or later step '{step}'")),
            Some(outputs) if !outputs.contains(output) => {
                Some(format!("references undeclared output '{step}.{output}'"))
            }
            Some(_) => None,
        },
        _ => None,
    }
}
