//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `run`           | `Run`                                              |
//! | `phase`         | `List`, `Status`, `Reset`                          |
//! | `project`       | `Init`                                             |

pub mod phase;
pub mod project;
pub mod run;

pub use phase::{cmd_list, cmd_reset, cmd_status};
pub use project::cmd_init;
pub use run::cmd_run;
