pub mod publish;
pub mod render;
pub mod types;

pub use publish::{CommentPublisher, MarkdownPublisher, PublishError};
pub use render::render_comment;

use colored::Colorize;

use crate::devops::PrEvent;
use crate::pipeline::Outcome;

/// Print a one-line run summary to stderr, keeping stdout free for the
/// dry-run comment.
pub fn print_outcome(event: &PrEvent, outcome: Outcome) {
    eprintln!("{}", outcome_line(event, outcome));
}

/// Print the run-failed line.
pub fn print_failure(event: &PrEvent, message: &str) {
    eprintln!("{}", failure_line(event, message));
}

fn outcome_line(event: &PrEvent, outcome: Outcome) -> String {
    format!(
        "PR #{} ({}): {}",
        event.pull_request_id,
        event.repository_id,
        colorize_outcome(outcome)
    )
}

fn failure_line(event: &PrEvent, message: &str) -> String {
    format!(
        "PR #{} ({}): {} {}",
        event.pull_request_id,
        event.repository_id,
        "FAILED".red().bold(),
        message
    )
}

fn colorize_outcome(outcome: Outcome) -> colored::ColoredString {
    match outcome {
        Outcome::Completed => "COMPLETED".green().bold(),
        Outcome::NoChanges => "NO CHANGES".yellow().bold(),
        Outcome::NoLayer => "NO LAYER".yellow().bold(),
    }
}
