//! Side effects: configuration files, the store, agent backends and child
//! processes.

pub mod backend;
pub mod config;
pub mod init;
pub mod process;
pub mod store;
