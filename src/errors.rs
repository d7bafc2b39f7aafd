use std::{error::Error as StdError, io, path::PathBuf};

use nvml_wrapper::error::NvmlError;
use thiserror::Error;

// Errors reported by a device provider
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Nvml(#[from] NvmlError),
    #[error("device query failed: {0}")]
    Query(String),
}

// The main sampler error type
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("unsupported sampling metric: {0}")]
    UnsupportedMetric(String),
    #[error("failed to enumerate devices: {reported} reported, {acquired} acquired")]
    EnumerationFailure { reported: u32, acquired: u32 },
    #[error("failed to initialize the device provider")]
    ProviderInit(#[source] DeviceError),
    #[error("failed to query the device count")]
    EnumerationQuery(#[source] DeviceError),
    #[error("probe query on device 0 failed")]
    ProbeFailure(#[source] DeviceError),
    #[error("failed to open log file {path:?}")]
    LogOpenFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write log for device {index}")]
    LogWriteFailure {
        index: u32,
        #[source]
        source: io::Error,
    },
    #[error("sample query failed for device {index}")]
    SampleQueryFailure {
        index: u32,
        #[source]
        source: DeviceError,
    },
    #[error("invalid sampler state: {0}")]
    InvalidState(&'static str),
    #[error("teardown failed: {0}")]
    TeardownFailure(String),
}

// Render an error followed by all of its sources
pub fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();

    let mut source = err.source();
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }

    message
}
