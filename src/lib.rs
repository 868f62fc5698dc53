pub mod relay;
pub mod consumer;
pub mod utils;
