//! Command implementations for the CLI.

mod config;
mod list;
mod purge;
mod record;

pub use config::cmd_config;
pub use list::cmd_list;
pub use purge::{cmd_clear, cmd_delete, cmd_purge};
pub use record::cmd_record;
