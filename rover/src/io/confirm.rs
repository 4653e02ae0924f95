//! Operator confirmation for steps that need a human decision.

use dialoguer::Confirm as Prompt;
use dialoguer::theme::ColorfulTheme;
use tracing::warn;

pub trait Confirm {
    fn confirm(&self, question: &str) -> bool;
}

/// Asks on the terminal; any prompt failure (e.g. no TTY) counts as "no".
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, question: &str) -> bool {
        Prompt::with_theme(&ColorfulTheme::default())
            .with_prompt(question)
            .default(false)
            .interact()
            .unwrap_or_else(|err| {
                warn!(err = %err, "confirmation prompt failed, treating as no");
                false
            })
    }
}

/// Answers every question with a fixed value (`--yes`).
#[derive(Debug, Clone, Copy)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, _question: &str) -> bool {
        true
    }
}
