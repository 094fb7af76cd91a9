pub mod app;
pub mod config;
pub mod execution;
pub mod group;
pub mod ipc;
pub mod messaging;
pub mod mounts;
pub mod queue;
pub mod runtime;
pub mod shared;
pub mod store;
pub mod tasks;
