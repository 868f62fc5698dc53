pub mod error;
pub mod config;
pub mod clock;
pub mod net;
pub mod metrics;
pub mod metrics_export;
pub mod trace;
pub mod shutdown;
