//! Project initialization command.

use anyhow::Result;

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    use relay::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);
    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized relay project at {}",
            result.relay_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .relay/");
        println!("  ├── relay.toml    # Configuration (limits, governor, ledger, worker)");
        println!("  ├── ledger/       # Append log + compacted snapshot");
        println!("  ├── logs/         # Per-item context and output logs");
        println!("  └── escalations/  # Structured escalation reports");
        println!();
        println!("Next steps:");
        println!("  1. Configure a worker command in .relay/relay.toml");
        println!("  2. Run `relay run all` to execute the workflow");
    } else if was_initialized {
        println!(
            "Relay project already initialized at {}",
            result.relay_dir.display()
        );
        println!("Directory structure verified.");
    } else {
        println!(
            "Completed relay initialization at {}",
            result.relay_dir.display()
        );
    }

    Ok(())
}
