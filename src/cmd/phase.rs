//! Phase listing, status, and reset commands.

use anyhow::Result;
use std::path::Path;

use relay::errors::MachineError;

pub fn cmd_list() -> Result<()> {
    use relay::phase::WorkflowPhase;

    println!();
    println!(
        "{:<6} {:<18} {:<28} {:<14} Name",
        "Order", "Phase", "Prerequisites", "Produces"
    );
    println!(
        "{:<6} {:<18} {:<28} {:<14} ----",
        "-----", "------------------", "----------------------------", "--------------"
    );

    for (i, phase) in WorkflowPhase::all().iter().enumerate() {
        let prereqs = if phase.prerequisites().is_empty() {
            "-".to_string()
        } else {
            phase
                .prerequisites()
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!(
            "{:<6} {:<18} {:<28} {:<14} {}",
            i + 1,
            phase.as_str(),
            prereqs,
            phase.produces().as_str(),
            phase.display_name()
        );
    }
    println!();
    println!("Phases run strictly in this order; none can be skipped.");
    Ok(())
}

pub fn cmd_status(project_dir: &Path) -> Result<()> {
    use relay::init::{get_relay_dir, is_initialized};
    use relay::ledger::{Ledger, PhaseStatus};
    use relay::phase::WorkflowPhase;

    println!();
    println!("Relay Project Status");
    println!("====================");
    println!();

    if !is_initialized(project_dir) {
        println!("Project: Not initialized");
        println!();
        println!("Run 'relay init' to initialize the project.");
        println!();
        return Ok(());
    }

    println!("Project: Initialized");

    let ledger_dir = get_relay_dir(project_dir).join("ledger");
    let snapshot = match Ledger::read_state(&ledger_dir) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            println!("Ledger:  CORRUPTED ({e})");
            println!();
            println!("The append log or snapshot failed an integrity check.");
            println!("Inspect {} before resetting.", ledger_dir.display());
            println!();
            return Ok(());
        }
    };

    match snapshot.cursor_phase() {
        Some(phase) => println!("Cursor:  {} ({})", phase, phase.display_name()),
        None => println!("Cursor:  all phases complete"),
    }
    println!("Artifacts registered: {}", snapshot.artifact_count());
    println!();

    println!("{:<18} {:<10} {:<10} Completed", "Phase", "Status", "Artifacts");
    for phase in WorkflowPhase::all() {
        let record = snapshot.phase_record(*phase);
        let marker = match record.status {
            PhaseStatus::Complete => console::style("✓").green().to_string(),
            PhaseStatus::Active => console::style("▶").yellow().to_string(),
            PhaseStatus::Failed => console::style("✗").red().to_string(),
            PhaseStatus::Pending => console::style("·").dim().to_string(),
        };
        let completed = record
            .completed_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{marker} {:<16} {:<10} {:<10} {}",
            phase.as_str(),
            record.status.to_string(),
            record.artifacts_produced,
            completed
        );
    }
    println!();

    if snapshot.is_all_complete() {
        println!("Workflow complete.");
    } else if snapshot.last_seq == 0 {
        println!("Execution: Not started");
        println!();
        println!("Run 'relay run all' to start execution.");
    }
    println!();
    Ok(())
}

pub fn cmd_reset(
    project_dir: &Path,
    phase_arg: &str,
    force: bool,
    config_file: Option<std::path::PathBuf>,
) -> Result<(), MachineError> {
    use dialoguer::Confirm;
    use relay::config::Config;
    use relay::ledger::Ledger;
    use relay::phase::WorkflowPhase;

    let phase: WorkflowPhase = phase_arg.parse().map_err(MachineError::Other)?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "This will reset phase '{phase}' and every phase after it. Are you sure?"
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let config = Config::new(project_dir.to_path_buf(), false, config_file)
        .map_err(MachineError::Other)?;
    config.ensure_directories().map_err(MachineError::Other)?;

    let ledger = Ledger::open(&config.ledger_dir, config.compaction_policy()).map_err(|e| {
        MachineError::Aborted {
            kind: e.kind(),
            detail: e.to_string(),
        }
    })?;
    ledger.phase_reset(phase).map_err(|e| MachineError::Aborted {
        kind: e.kind(),
        detail: e.to_string(),
    })?;

    println!("Phase '{phase}' and successors reset to pending");
    Ok(())
}
