//! Workflow execution — `relay run <phase|all>`.

use std::path::PathBuf;
use std::sync::Arc;

use console::style;

use relay::config::Config;
use relay::dispatch::Dispatcher;
use relay::errors::MachineError;
use relay::governor::ResourceGovernor;
use relay::init::is_initialized;
use relay::ledger::Ledger;
use relay::machine::{PhaseStateMachine, RunOutcome, RunTarget};
use relay::phase::WorkflowPhase;
use relay::recovery::RecoveryController;
use relay::ui::OrchestratorUI;
use relay::worker::WorkerRegistry;

use super::super::Cli;

pub fn check_run_prerequisites(project_dir: &std::path::Path) -> anyhow::Result<()> {
    if !is_initialized(project_dir) {
        anyhow::bail!("Project not initialized. Run 'relay init' first.");
    }
    Ok(())
}

/// Parse the run target: the literal `all` or a single phase name.
pub fn parse_run_target(target: &str) -> anyhow::Result<RunTarget> {
    if target.eq_ignore_ascii_case("all") {
        return Ok(RunTarget::All);
    }
    let phase: WorkflowPhase = target.parse()?;
    Ok(RunTarget::Single(phase))
}

pub async fn cmd_run(
    cli: &Cli,
    project_dir: PathBuf,
    target: &str,
) -> Result<RunOutcome, MachineError> {
    check_run_prerequisites(&project_dir)?;
    let target = parse_run_target(target).map_err(MachineError::Other)?;

    let config = Config::new(project_dir, cli.verbose, cli.config.clone())?;
    config.ensure_directories()?;

    let ledger = Arc::new(
        Ledger::open(&config.ledger_dir, config.compaction_policy()).map_err(|e| {
            MachineError::Aborted {
                kind: e.kind(),
                detail: e.to_string(),
            }
        })?,
    );

    let governor = Arc::new(ResourceGovernor::new(
        config.ceilings(),
        &config.toml.governor,
    ));

    let registry = WorkerRegistry::from_config(&config.toml.worker);
    if registry.is_empty() {
        println!(
            "{} No worker command configured in relay.toml; phases will fail until one is set.",
            style("Warning:").yellow().bold()
        );
    }

    let dispatcher = Dispatcher::new(
        governor,
        ledger.clone(),
        registry,
        &config.project_dir,
        &config.log_dir,
    );

    let recovery = RecoveryController::new(config.toml.limits.max_retries_per_phase);
    let ui = Arc::new(OrchestratorUI::new(
        WorkflowPhase::all().len() as u64,
        cli.verbose,
    ));

    let mut machine = PhaseStateMachine::new(
        ledger,
        dispatcher,
        recovery,
        config.default_constraints(),
        &config.escalations_dir,
    )
    .with_ui(ui.clone());

    let result = machine.run(target).await;
    ui.finish();

    match &result {
        Ok(RunOutcome::Completed) => {
            println!("{} Run complete", style("✓").green());
        }
        Ok(RunOutcome::AlreadyComplete(phase)) => {
            println!(
                "Phase '{phase}' is already complete. Use 'relay reset {phase}' to run it again."
            );
        }
        Ok(RunOutcome::AllComplete) => {
            println!("All phases are complete; nothing to do.");
        }
        Err(MachineError::Escalated {
            phase,
            attempts,
            last_error,
            report,
        }) => {
            println!();
            println!(
                "{} Phase '{}' escalated after {} attempt(s): {}",
                style("Escalated:").red().bold(),
                phase,
                attempts,
                last_error
            );
            for result in &report.recent_results {
                let error = result
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "ok".to_string());
                println!(
                    "  item {}: {} ({} iteration(s), {:.1}s)",
                    &result.work_item_id.to_string()[..8],
                    error,
                    result.usage.iterations,
                    result.usage.duration_secs
                );
            }
            println!("  Full report written under .relay/escalations/");
        }
        Err(MachineError::Aborted { kind, detail }) => {
            println!();
            println!(
                "{} {} ({})",
                style("Aborted:").red().bold(),
                detail,
                kind
            );
            println!("  The ledger was left untouched by the failed operation; inspect it with 'relay status'.");
        }
        Err(e) => {
            println!();
            println!("{} {}", style("Error:").red().bold(), e);
        }
    }

    result
}
