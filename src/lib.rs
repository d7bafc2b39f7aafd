pub mod arg_parser;
pub mod config;
pub mod device;
pub mod device_report;
pub mod errors;
pub mod log_stream;
pub mod logger;
pub mod metric;
pub mod poller;
pub mod sampler;

pub use errors::SamplerError;
pub use sampler::{PollReport, Sampler, SamplerState};
