use crate::{
    errors::DeviceError,
    metric::{MetricKind, SampleBatch},
};

pub mod nvidia_device;

// A device acquired at enumeration time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub index: u32,
    pub uuid: Option<String>,
}

// Current utilization rates in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utilization {
    pub gpu: u32,
    pub memory: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockDomain {
    Sm,
    Memory,
}

// A supported memory clock with the graphics clocks usable with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockPair {
    pub memory_clock: u32,
    pub graphics_clocks: Vec<u32>,
}

// Device management capability used by the sampler.
// Implementations must report a failed query on one device
// without corrupting the state of the other devices
pub trait DeviceProvider {
    // Return the number of devices reported by the driver
    fn device_count(&self) -> Result<u32, DeviceError>;

    // Acquire the device at the given index
    fn device(&self, index: u32) -> Result<DeviceHandle, DeviceError>;

    // Return every sample of the given metric with a
    // timestamp strictly greater than `since`
    fn samples(
        &self,
        index: u32,
        metric: MetricKind,
        since: u64,
    ) -> Result<SampleBatch, DeviceError>;

    // Current power draw in milliwatts
    fn power_usage(&self, index: u32) -> Result<u32, DeviceError>;

    fn utilization(&self, index: u32) -> Result<Utilization, DeviceError>;

    // Current clock of the given domain in MHz
    fn clock(&self, index: u32, domain: ClockDomain)
    -> Result<u32, DeviceError>;

    fn supported_clocks(&self, index: u32)
    -> Result<Vec<ClockPair>, DeviceError>;

    // Release the process-wide capability handle held by this provider,
    // calling any other method afterwards is an error
    fn release(&mut self) -> Result<(), DeviceError>;
}
