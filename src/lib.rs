pub mod artifact;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod governor;
pub mod init;
pub mod ledger;
pub mod machine;
pub mod phase;
pub mod recovery;
pub mod relay_config;
pub mod ui;
pub mod worker;
pub mod workitem;
