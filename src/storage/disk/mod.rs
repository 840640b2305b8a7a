mod disk_manager;
mod disk_scheduler;
mod memory_disk_manager;

pub use disk_manager::{DiskManager, DiskStats, FileDiskManager};
pub(crate) use disk_manager::check_page_args;
pub use disk_scheduler::*;
pub use memory_disk_manager::*;
