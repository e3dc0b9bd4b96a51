pub mod config;
pub mod flow;
pub mod gate;
pub mod logger;
pub mod metrics;
pub mod plugins;
pub mod scheduler;
