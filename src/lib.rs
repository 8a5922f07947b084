pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod hedonic;
pub mod logging;
pub mod metrics;
pub mod pipeline;
