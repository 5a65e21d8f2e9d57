pub mod supervisor;
pub mod events;
pub mod ipc;
pub mod config;
pub mod status;
pub mod helper_locator;
pub mod device;
pub mod process_monitor;
pub mod utils;
