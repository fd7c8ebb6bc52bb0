//! Build progress reporting: the data contract between the engine and
//! whatever renders it.
//!
//! The engine never writes progress to the terminal itself; it emits these
//! notifications and a reporter decides interactive-vs-redirected
//! presentation.  Only the plain console reporter ships here.

use crate::graph::{Rule, RuleId};
use crate::process::Termination;
use crate::task::TaskResult;
use crate::work::StateCounts;
use std::io::Write;

/// Compute the message to display on the console for a given rule.
pub fn build_message(rule: &Rule) -> &str {
    rule.desc
        .as_deref()
        .filter(|desc| !desc.is_empty())
        .unwrap_or(&rule.cmdline)
}

/// Trait for build progress notifications.
pub trait Progress {
    /// Called as rules progress through build states; carries how many
    /// remain via the counts.
    fn update(&mut self, counts: &StateCounts);

    /// Called when a rule's command is handed to a worker.
    fn task_started(&mut self, id: RuleId, rule: &Rule);

    /// Called when a rule's command finishes, with its captured and
    /// filtered output.
    fn task_finished(&mut self, id: RuleId, rule: &Rule, result: &TaskResult);

    /// Log a line of output, persisted beyond further progress updates.
    fn log(&mut self, msg: &str);
}

/// Progress implementation for a "dumb" console: plain lines, no
/// overprinting.
#[derive(Default)]
pub struct DumbConsoleProgress {
    /// Whether to print command lines of started programs.
    verbose: bool,

    /// The id of the last command printed, used to avoid printing it twice
    /// when we have two updates from the same command in a row.
    last_started: Option<RuleId>,
}

impl DumbConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            last_started: None,
        }
    }
}

impl Progress for DumbConsoleProgress {
    fn update(&mut self, _counts: &StateCounts) {
        // ignore
    }

    fn task_started(&mut self, id: RuleId, rule: &Rule) {
        self.log(if self.verbose {
            &rule.cmdline
        } else {
            build_message(rule)
        });
        self.last_started = Some(id);
    }

    fn task_finished(&mut self, id: RuleId, rule: &Rule, result: &TaskResult) {
        match result.termination {
            Termination::Success => {
                if result.output.is_empty() || self.last_started == Some(id) {
                    // Output is empty, or we just printed the command;
                    // don't print it again.
                } else {
                    self.log(build_message(rule))
                }
            }
            Termination::Interrupted => self.log(&format!("interrupted: {}", build_message(rule))),
            Termination::Failure => self.log(&format!("failed: {}", build_message(rule))),
        }
        if !result.output.is_empty() {
            let _ = std::io::stdout().write_all(&result.output);
        }
    }

    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}
