//! Command implementations.

pub mod fetch;
pub mod helpers;
pub mod init;
pub mod show;
pub mod update;

pub use fetch::run_fetch;
pub use init::run_init;
pub use show::run_show;
pub use update::run_update;
