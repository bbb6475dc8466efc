pub mod config;
pub mod mirror;
pub mod notify;
pub mod records;
pub mod remote;
pub mod rename;
pub mod retry;
pub mod runner;
pub mod task;
