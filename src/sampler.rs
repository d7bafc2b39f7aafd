use std::path::Path;

use tracing::{debug, error, info, trace, warn};

use crate::{
    config::SamplerConfig,
    device::{DeviceHandle, DeviceProvider, nvidia_device::NvmlProvider},
    device_report::DeviceReport,
    errors::{SamplerError, error_chain},
    log_stream::{LogStream, log_path},
    metric::{MetricKind, ValueEncoding},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Constructed,
    Polling,
    TornDown,
}

// Outcome of a single device during a poll cycle
#[derive(Debug)]
pub struct DeviceOutcome {
    pub index: u32,
    // Number of lines appended to the device log
    pub lines: usize,
    // Number of samples returned by the device
    pub samples: usize,
    // Timestamp of the first and last returned sample
    pub span: Option<(u64, u64)>,
    pub error: Option<SamplerError>,
}

impl DeviceOutcome {
    fn empty(index: u32) -> Self {
        Self {
            index,
            lines: 0,
            samples: 0,
            span: None,
            error: None,
        }
    }

    // Time covered by the returned samples, in the device clock unit
    pub fn duration(&self) -> Option<u64> {
        self.span.map(|(oldest, newest)| newest.saturating_sub(oldest))
    }
}

// Result of a poll cycle over all the devices
#[derive(Debug, Default)]
pub struct PollReport {
    pub outcomes: Vec<DeviceOutcome>,
}

impl PollReport {
    pub fn lines_written(&self) -> usize {
        self.outcomes.iter().map(|o| o.lines).sum()
    }

    // Indices of the devices whose query failed in this cycle
    pub fn failed_devices(&self) -> Vec<u32> {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_some())
            .map(|o| o.index)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|o| o.error.is_none())
    }
}

// Store everything the sampler owns for a device
struct DeviceSlot {
    handle: DeviceHandle,
    log: LogStream,

    // Timestamp of the last consumed sample, 0 when none was consumed
    watermark: u64,
}

// Incremental sampler writing the samples of
// one metric to a CSV log per device
pub struct Sampler {
    provider: Box<dyn DeviceProvider + Send>,

    metric: MetricKind,
    // Representation probed at construction time,
    // used to decode every sample
    encoding: ValueEncoding,

    devices: Vec<DeviceSlot>,
    state: SamplerState,
}

impl Sampler {
    // Create a sampler on top of the given provider. On failure the
    // provider is released and every log opened so far is closed
    pub fn new(
        mut provider: Box<dyn DeviceProvider + Send>,
        log_base_name: &str,
        metric: MetricKind,
    ) -> Result<Self, SamplerError> {
        info!("Creating {metric} sampler with logs at \"{log_base_name}\"");

        match Self::open(&*provider, log_base_name, metric) {
            Ok((devices, encoding)) => {
                debug!(
                    "Sampling {} device(s), values encoded as {:?}",
                    devices.len(),
                    encoding
                );

                Ok(Self {
                    provider,
                    metric,
                    encoding,
                    devices,
                    state: SamplerState::Constructed,
                })
            }
            Err(err) => {
                if let Err(release_err) = provider.release() {
                    warn!("Failed to release device provider: {release_err}");
                }

                Err(err)
            }
        }
    }

    // Create a sampler from the configuration,
    // the metric name is validated first
    pub fn from_config(
        mut provider: Box<dyn DeviceProvider + Send>,
        config: &SamplerConfig,
    ) -> Result<Self, SamplerError> {
        let metric = match config.metric_kind() {
            Ok(metric) => metric,
            Err(err) => {
                if let Err(release_err) = provider.release() {
                    warn!("Failed to release device provider: {release_err}");
                }

                return Err(err);
            }
        };

        Self::new(provider, &config.log_base_name, metric)
    }

    // Create a sampler on the devices reported by NVML
    pub fn with_nvml(
        log_base_name: &str,
        metric: MetricKind,
    ) -> Result<Self, SamplerError> {
        let provider = NvmlProvider::new().map_err(SamplerError::ProviderInit)?;

        Self::new(Box::new(provider), log_base_name, metric)
    }

    fn open(
        provider: &dyn DeviceProvider,
        log_base_name: &str,
        metric: MetricKind,
    ) -> Result<(Vec<DeviceSlot>, ValueEncoding), SamplerError> {
        let handles = Self::enumerate(provider)?;

        let mut devices = Vec::with_capacity(handles.len());
        for handle in handles {
            let path = log_path(log_base_name, handle.index);

            let log = match LogStream::create(handle.index, &path) {
                Ok(log) => log,
                Err(err) => {
                    Self::close_all(&mut devices);
                    return Err(err);
                }
            };

            devices.push(DeviceSlot {
                handle,
                log,
                watermark: 0,
            });
        }

        // Throwaway read on the first device to learn the value encoding
        let probe = match provider.samples(devices[0].handle.index, metric, 0) {
            Ok(batch) => batch,
            Err(err) => {
                Self::close_all(&mut devices);
                return Err(SamplerError::ProbeFailure(err));
            }
        };

        let encoding = probe.encoding.unwrap_or_else(|| {
            debug!("Probe returned no samples, assuming default encoding");
            metric.default_encoding()
        });

        Ok((devices, encoding))
    }

    // Acquire every device, a partial enumeration is an error
    fn enumerate(
        provider: &dyn DeviceProvider,
    ) -> Result<Vec<DeviceHandle>, SamplerError> {
        let reported = provider
            .device_count()
            .map_err(SamplerError::EnumerationQuery)?;

        let mut handles = Vec::with_capacity(reported as usize);
        for index in 0..reported {
            match provider.device(index) {
                Ok(handle) => handles.push(handle),
                Err(err) => warn!("Failed to acquire device {index}: {err}"),
            }
        }

        let acquired = handles.len() as u32;
        if acquired != reported || reported == 0 {
            return Err(SamplerError::EnumerationFailure { reported, acquired });
        }

        Ok(handles)
    }

    fn close_all(devices: &mut [DeviceSlot]) {
        for slot in devices.iter_mut() {
            if let Err(err) = slot.log.close() {
                warn!("{}", error_chain(&err));
            }
        }
    }

    // Write the CSV header to every log,
    // each call appends another header line
    pub fn write_header(&mut self) -> Result<(), SamplerError> {
        self.ensure_active()?;

        let header = format!("Time,{}\n", self.metric.label());

        let mut result = Ok(());
        for slot in self.devices.iter_mut() {
            if let Err(err) = slot.log.append(&header) {
                error!("{}", error_chain(&err));

                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        result
    }

    // Query every device for the samples newer than its
    // watermark and append them to the device log
    pub fn poll_and_log(&mut self) -> Result<PollReport, SamplerError> {
        self.poll(true)
    }

    // Move every watermark to the newest available
    // sample without writing anything to the logs
    pub fn advance_watermark_only(&mut self) -> Result<PollReport, SamplerError> {
        self.poll(false)
    }

    fn poll(&mut self, write: bool) -> Result<PollReport, SamplerError> {
        self.ensure_active()?;
        self.state = SamplerState::Polling;

        let mut report = PollReport::default();

        for slot in self.devices.iter_mut() {
            let index = slot.handle.index;

            // A failure is confined to this device and cycle
            let outcome = match Self::poll_device(
                &*self.provider,
                self.metric,
                self.encoding,
                slot,
                write,
            ) {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!("Sampling failed on device {index}: {}", error_chain(&err));

                    DeviceOutcome {
                        error: Some(err),
                        ..DeviceOutcome::empty(index)
                    }
                }
            };

            report.outcomes.push(outcome);
        }

        debug!(
            "Poll cycle done: {} line(s) written, failed devices {:?}",
            report.lines_written(),
            report.failed_devices()
        );

        Ok(report)
    }

    // Query a single device. The watermark is only moved
    // once the samples have been written to the log
    fn poll_device(
        provider: &dyn DeviceProvider,
        metric: MetricKind,
        encoding: ValueEncoding,
        slot: &mut DeviceSlot,
        write: bool,
    ) -> Result<DeviceOutcome, SamplerError> {
        let index = slot.handle.index;
        let mut outcome = DeviceOutcome::empty(index);

        let batch = provider
            .samples(index, metric, slot.watermark)
            .map_err(|source| SamplerError::SampleQueryFailure { index, source })?;

        let Some(newest) = batch.newest() else {
            trace!("Device {index}: no samples since {}", slot.watermark);
            return Ok(outcome);
        };

        let oldest = batch.samples[0].timestamp;

        outcome.samples = batch.samples.len();
        outcome.span = Some((oldest, newest));

        debug!(
            "Device {index}: {} sample(s) from {oldest} to {newest} ({} elapsed)",
            outcome.samples,
            newest.saturating_sub(oldest)
        );

        if write {
            let mut text = String::new();
            for sample in &batch.samples {
                text.push_str(&format!(
                    "{},{}\n",
                    sample.timestamp,
                    encoding.decode(sample.bits)
                ));
            }

            slot.log.append(&text)?;
            outcome.lines = batch.samples.len();
        }

        // Samples older than the watermark are the provider's
        // problem, but the cursor itself never moves backwards
        slot.watermark = slot.watermark.max(newest);

        trace!("Device {index}: watermark at {}", slot.watermark);

        Ok(outcome)
    }

    // Collect a snapshot of every device
    pub fn report(&self) -> Result<Vec<DeviceReport>, SamplerError> {
        self.ensure_active()?;

        Ok(self
            .devices
            .iter()
            .map(|slot| DeviceReport::collect(&*self.provider, &slot.handle))
            .collect())
    }

    // Flush and close every log, then release the provider.
    // Every resource is attempted even if an earlier one fails
    pub fn teardown(&mut self) -> Result<(), SamplerError> {
        if self.state == SamplerState::TornDown {
            return Err(SamplerError::InvalidState("sampler already torn down"));
        }
        self.state = SamplerState::TornDown;

        let mut failures = Vec::new();

        for slot in self.devices.iter_mut() {
            if let Err(err) = slot.log.close() {
                let message = error_chain(&err);
                error!("{message}");
                failures.push(message);
            }
        }

        if let Err(err) = self.provider.release() {
            let message = format!("failed to release device provider: {err}");
            error!("{message}");
            failures.push(message);
        }

        info!("Sampler torn down");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SamplerError::TeardownFailure(failures.join("; ")))
        }
    }

    fn ensure_active(&self) -> Result<(), SamplerError> {
        if self.state == SamplerState::TornDown {
            return Err(SamplerError::InvalidState("sampler is torn down"));
        }

        Ok(())
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn metric(&self) -> MetricKind {
        self.metric
    }

    pub fn encoding(&self) -> ValueEncoding {
        self.encoding
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceHandle> {
        self.devices.iter().map(|slot| &slot.handle)
    }

    // Return the watermark of the device with the given index
    pub fn watermark(&self, index: u32) -> Option<u64> {
        self.devices
            .iter()
            .find(|slot| slot.handle.index == index)
            .map(|slot| slot.watermark)
    }

    pub fn log_paths(&self) -> Vec<&Path> {
        self.devices.iter().map(|slot| slot.log.path()).collect()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if self.state != SamplerState::TornDown {
            if let Err(err) = self.teardown() {
                error!("{}", error_chain(&err));
            }
        }
    }
}
