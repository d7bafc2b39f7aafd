use std::sync::{Arc, Mutex, PoisonError, Weak};

use nvml_wrapper::{
    Device, Nvml,
    enum_wrappers::device::{Clock, ClockId, Sampling},
    enums::device::SampleValue as NvmlSampleValue,
    error::NvmlError,
};
use tracing::{debug, error, info, trace};

use crate::{
    device::{ClockDomain, ClockPair, DeviceHandle, DeviceProvider, Utilization},
    errors::DeviceError,
    metric::{MetricKind, RawSample, SampleBatch, ValueEncoding},
};

// NVML initialization is process wide. The first provider initializes
// the library, later providers share it and the last one to be
// released shuts it down
static SHARED_NVML: Mutex<Weak<Nvml>> = Mutex::new(Weak::new());

// Device provider backed by the NVML library
pub struct NvmlProvider {
    // NVML is thread-safe so it is safe to make
    // simultaneous NVML calls from multiple threads.
    // None once the provider has been released
    nvml: Option<Arc<Nvml>>,
}

impl NvmlProvider {
    pub fn new() -> Result<Self, DeviceError> {
        let nvml = acquire_shared()?;

        Ok(Self { nvml: Some(nvml) })
    }

    fn nvml(&self) -> Result<&Nvml, DeviceError> {
        self.nvml.as_deref().ok_or_else(|| {
            DeviceError::Query("NVML handle already released".to_string())
        })
    }

    // Return a NVML device handle.
    // This function can fail and return an error
    fn get(&self, index: u32) -> Result<Device<'_>, DeviceError> {
        Ok(self.nvml()?.device_by_index(index)?)
    }
}

impl DeviceProvider for NvmlProvider {
    fn device_count(&self) -> Result<u32, DeviceError> {
        Ok(self.nvml()?.device_count()?)
    }

    fn device(&self, index: u32) -> Result<DeviceHandle, DeviceError> {
        let device = self.get(index)?;
        let uuid = device.uuid().ok();

        debug!("Found Nvidia device {index}: {:?}", uuid);

        Ok(DeviceHandle { index, uuid })
    }

    fn samples(
        &self,
        index: u32,
        metric: MetricKind,
        since: u64,
    ) -> Result<SampleBatch, DeviceError> {
        let device = self.get(index)?;

        let samples =
            none_found_as_empty(device.samples(sampling_for(metric), since))?;

        trace!(
            "Device {index}: {} {} samples since {since}",
            samples.len(),
            metric
        );

        let mut batch = SampleBatch::empty();
        for sample in samples {
            let (encoding, bits) = split_value(sample.value)?;

            batch.encoding.get_or_insert(encoding);
            batch.samples.push(RawSample {
                timestamp: sample.timestamp,
                bits,
            });
        }

        Ok(batch)
    }

    fn power_usage(&self, index: u32) -> Result<u32, DeviceError> {
        Ok(self.get(index)?.power_usage()?)
    }

    fn utilization(&self, index: u32) -> Result<Utilization, DeviceError> {
        let rates = self.get(index)?.utilization_rates()?;

        Ok(Utilization {
            gpu: rates.gpu,
            memory: rates.memory,
        })
    }

    fn clock(
        &self,
        index: u32,
        domain: ClockDomain,
    ) -> Result<u32, DeviceError> {
        let clock = match domain {
            ClockDomain::Sm => Clock::SM,
            ClockDomain::Memory => Clock::Memory,
        };

        Ok(self.get(index)?.clock(clock, ClockId::Current)?)
    }

    fn supported_clocks(
        &self,
        index: u32,
    ) -> Result<Vec<ClockPair>, DeviceError> {
        let device = self.get(index)?;

        let mut pairs = Vec::new();
        for memory_clock in device.supported_memory_clocks()? {
            let graphics_clocks =
                device.supported_graphics_clocks(memory_clock)?;

            pairs.push(ClockPair {
                memory_clock,
                graphics_clocks,
            });
        }

        Ok(pairs)
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        match self.nvml.take() {
            Some(nvml) => release_shared(nvml),
            None => Ok(()),
        }
    }
}

impl Drop for NvmlProvider {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            error!("Failed to release NVML: {err}");
        }
    }
}

fn sampling_for(metric: MetricKind) -> Sampling {
    match metric {
        MetricKind::Power => Sampling::Power,
        MetricKind::MemoryUtilization => Sampling::MemoryUtilization,
        MetricKind::GpuUtilization => Sampling::GpuUtilization,
        MetricKind::ProcessorClock => Sampling::ProcessorClock,
        MetricKind::MemoryClock => Sampling::MemoryClock,
    }
}

// NVML reports an empty sample buffer as NotFound
fn none_found_as_empty<T>(
    result: Result<Vec<T>, NvmlError>,
) -> Result<Vec<T>, NvmlError> {
    match result {
        Err(NvmlError::NotFound) => Ok(Vec::new()),
        other => other,
    }
}

// Split a NVML sample value into its encoding tag and payload bits
#[allow(unreachable_patterns)]
fn split_value(
    value: NvmlSampleValue,
) -> Result<(ValueEncoding, u64), DeviceError> {
    match value {
        NvmlSampleValue::F64(v) => Ok((ValueEncoding::Double, v.to_bits())),
        NvmlSampleValue::U32(v) => Ok((ValueEncoding::UnsignedInt, v as u64)),
        NvmlSampleValue::U64(v) => Ok((ValueEncoding::UnsignedLongLong, v)),
        NvmlSampleValue::I64(v) => {
            Ok((ValueEncoding::SignedLongLong, v as u64))
        }
        other => Err(DeviceError::Query(format!(
            "unsupported sample value: {other:?}"
        ))),
    }
}

fn acquire_shared() -> Result<Arc<Nvml>, DeviceError> {
    let mut slot = SHARED_NVML.lock().unwrap_or_else(PoisonError::into_inner);

    if let Some(nvml) = slot.upgrade() {
        debug!("Reusing the process NVML handle");
        return Ok(nvml);
    }

    let nvml = Arc::new(Nvml::init()?);
    *slot = Arc::downgrade(&nvml);

    info!("NVML successfully initialized");

    Ok(nvml)
}

fn release_shared(nvml: Arc<Nvml>) -> Result<(), DeviceError> {
    // Hold the lock so no other provider can pick
    // up the handle while it is being shut down
    let _slot = SHARED_NVML.lock().unwrap_or_else(PoisonError::into_inner);

    match Arc::try_unwrap(nvml) {
        Ok(nvml) => {
            nvml.shutdown()?;
            info!("NVML shut down");
        }
        Err(_) => debug!("NVML still in use, skipping shutdown"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sample_buffer_is_an_empty_batch() {
        let samples = none_found_as_empty::<u32>(Err(NvmlError::NotFound));
        assert!(samples.unwrap().is_empty());

        let samples = none_found_as_empty(Ok(vec![1u32, 2]));
        assert_eq!(samples.unwrap(), vec![1, 2]);
    }

    #[test]
    fn other_sample_errors_are_kept() {
        let samples = none_found_as_empty::<u32>(Err(NvmlError::GpuLost));
        assert!(matches!(samples, Err(NvmlError::GpuLost)));
    }

    #[test]
    fn sample_values_keep_their_encoding() {
        let (encoding, bits) = split_value(NvmlSampleValue::U32(250)).unwrap();
        assert_eq!(encoding, ValueEncoding::UnsignedInt);
        assert_eq!(bits, 250);

        let (encoding, bits) = split_value(NvmlSampleValue::F64(1.5)).unwrap();
        assert_eq!(encoding, ValueEncoding::Double);
        assert_eq!(f64::from_bits(bits), 1.5);
    }
}
