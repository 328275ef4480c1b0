pub mod bias;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod modifier;
pub mod runner;
pub mod simulator;
pub mod telemetry;
