//! Terminal UI for the orchestrator, rendered via `indicatif` progress bars.
//!
//! Two bars are stacked vertically:
//! - Phase bar — tracks how many phases have completed
//! - Item bar — spinner with the current work item and live status

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

pub struct OrchestratorUI {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    item_bar: ProgressBar,
    verbose: bool,
}

impl OrchestratorUI {
    pub fn new(total_phases: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let phase_bar = multi.add(ProgressBar::new(total_phases));
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");

        let item_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let item_bar = multi.add(ProgressBar::new_spinner());
        item_bar.set_style(item_style);
        item_bar.set_prefix("  Item");

        Self {
            multi,
            phase_bar,
            item_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the
    /// rich UI fails, so escalation notices are never lost.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn start_phase(&self, phase: &str, description: &str) {
        self.phase_bar
            .set_message(format!("{}: {}", style(phase).yellow(), description));
    }

    pub fn start_item(&self, index: usize, total: usize, attempt: u32) {
        let attempt_note = if attempt > 0 {
            format!(" (retry {})", attempt)
        } else {
            String::new()
        };
        self.item_bar.set_message(format!(
            "Dispatching item {}/{}{}",
            style(index + 1).cyan(),
            total,
            style(attempt_note).dim()
        ));
        self.item_bar.enable_steady_tick(Duration::from_millis(100));
    }

    pub fn item_done(&self, index: usize, artifacts: usize) {
        self.item_bar.disable_steady_tick();
        if self.verbose {
            self.print_line(format!(
                "    {} item {} registered {} artifact(s)",
                style("✓").green(),
                index + 1,
                artifacts
            ));
        }
    }

    pub fn item_failed(&self, index: usize, error: &str) {
        self.item_bar.disable_steady_tick();
        self.print_line(format!(
            "    {} item {} failed: {}",
            style("✗").red(),
            index + 1,
            error
        ));
    }

    pub fn phase_complete(&self, phase: &str) {
        self.phase_bar.inc(1);
        self.print_line(format!("{} Phase {} complete", style("✓").green(), phase));
    }

    pub fn phase_failed(&self, phase: &str, reason: &str) {
        self.print_line(format!(
            "{} Phase {} failed: {}",
            style("✗").red(),
            phase,
            reason
        ));
    }

    pub fn finish(&self) {
        self.item_bar.finish_and_clear();
        self.phase_bar.finish_and_clear();
    }
}
