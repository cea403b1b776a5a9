pub mod classify;
pub mod daemon;
pub mod run_cmd;
pub mod status;
