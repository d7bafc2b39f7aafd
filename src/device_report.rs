use tracing::{info, warn};

use crate::device::{ClockDomain, ClockPair, DeviceHandle, DeviceProvider};

// Point in time snapshot of a device, every value that
// couldn't be fetched is left as None
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    pub index: u32,
    pub uuid: Option<String>,

    // Power usage in milliwatts
    pub power_usage: Option<u32>,

    // Utilization information
    pub core_usage: Option<u32>,
    pub mem_usage: Option<u32>,

    // Core and memory current frequency
    pub sm_freq: Option<u32>,
    pub mem_freq: Option<u32>,

    // Memory clocks with their supported graphics clocks
    pub supported_clocks: Vec<ClockPair>,
}

impl DeviceReport {
    pub fn collect(provider: &dyn DeviceProvider, handle: &DeviceHandle) -> Self {
        let index = handle.index;

        let mut report = DeviceReport {
            index,
            uuid: handle.uuid.clone(),
            ..Default::default()
        };

        match provider.power_usage(index) {
            Ok(power) => report.power_usage = Some(power),
            Err(err) => warn!("Failed to fetch power usage of device {index}: {err}"),
        }

        match provider.utilization(index) {
            Ok(utilization) => {
                report.core_usage = Some(utilization.gpu);
                report.mem_usage = Some(utilization.memory);
            }
            Err(err) => warn!("Failed to fetch utilization of device {index}: {err}"),
        }

        report.sm_freq = provider.clock(index, ClockDomain::Sm).ok();
        report.mem_freq = provider.clock(index, ClockDomain::Memory).ok();

        match provider.supported_clocks(index) {
            Ok(clocks) => report.supported_clocks = clocks,
            Err(err) => warn!("Failed to fetch supported clocks of device {index}: {err}"),
        }

        report
    }

    // Emit the report as log events
    pub fn log(&self) {
        info!(
            device = self.index,
            uuid = ?self.uuid,
            power_mw = ?self.power_usage,
            gpu_util = ?self.core_usage,
            mem_util = ?self.mem_usage,
            sm_mhz = ?self.sm_freq,
            mem_mhz = ?self.mem_freq,
            "Device report"
        );

        for pair in &self.supported_clocks {
            info!(
                device = self.index,
                "Memory clock {} MHz supports graphics clocks {:?}",
                pair.memory_clock,
                pair.graphics_clocks
            );
        }
    }
}
