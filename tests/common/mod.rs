#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use moss_sampler::{
    device::{ClockDomain, ClockPair, DeviceHandle, DeviceProvider, Utilization},
    errors::DeviceError,
    metric::{MetricKind, RawSample, SampleBatch, SampleValue, ValueEncoding},
};

// Scripted answer to the next samples query of a device
pub enum Response {
    Samples(Vec<(u64, SampleValue)>),
    Fail(&'static str),
}

pub struct FakeState {
    pub count: u32,
    pub count_fails: bool,
    pub unacquirable: HashSet<u32>,

    // Encoding reported with non empty batches
    pub encoding: Option<ValueEncoding>,
    pub probe_fails: bool,
    probed: bool,

    // Samples served to queries without a scripted response,
    // filtered by the requested timestamp
    pub history: HashMap<u32, Vec<RawSample>>,
    pub scripted: HashMap<u32, VecDeque<Response>>,

    pub queries: Vec<(u32, u64)>,
    pub releases: u32,
    pub release_fails: bool,
}

// In memory device provider
#[derive(Clone)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    pub fn new(count: u32) -> Self {
        let state = FakeState {
            count,
            count_fails: false,
            unacquirable: HashSet::new(),
            encoding: Some(ValueEncoding::UnsignedInt),
            probe_fails: false,
            probed: false,
            history: HashMap::new(),
            scripted: HashMap::new(),
            queries: Vec::new(),
            releases: 0,
            release_fails: false,
        };

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn boxed(&self) -> Box<dyn DeviceProvider + Send> {
        Box::new(self.clone())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    // Make new samples available on a device
    pub fn push_samples(&self, index: u32, samples: &[(u64, u32)]) {
        self.with(|state| {
            state.history.entry(index).or_default().extend(
                samples
                    .iter()
                    .map(|&(t, v)| RawSample::new(t, SampleValue::U32(v))),
            );
        });
    }

    pub fn script(&self, index: u32, response: Response) {
        self.with(|state| {
            state.scripted.entry(index).or_default().push_back(response);
        });
    }

    pub fn releases(&self) -> u32 {
        self.with(|state| state.releases)
    }

    pub fn queries(&self) -> Vec<(u32, u64)> {
        self.with(|state| state.queries.clone())
    }
}

impl DeviceProvider for FakeProvider {
    fn device_count(&self) -> Result<u32, DeviceError> {
        self.with(|state| {
            if state.count_fails {
                Err(DeviceError::Query("driver not loaded".to_string()))
            } else {
                Ok(state.count)
            }
        })
    }

    fn device(&self, index: u32) -> Result<DeviceHandle, DeviceError> {
        self.with(|state| {
            if index >= state.count {
                return Err(DeviceError::Query(format!("no device at index {index}")));
            }
            if state.unacquirable.contains(&index) {
                return Err(DeviceError::Query("handle unavailable".to_string()));
            }

            Ok(DeviceHandle {
                index,
                uuid: Some(format!("GPU-fake-{index}")),
            })
        })
    }

    fn samples(
        &self,
        index: u32,
        _metric: MetricKind,
        since: u64,
    ) -> Result<SampleBatch, DeviceError> {
        self.with(|state| {
            state.queries.push((index, since));

            // The first query is the probe and never consumes a script
            let first = !state.probed;
            state.probed = true;

            if first && state.probe_fails {
                return Err(DeviceError::Query("sampling not supported".to_string()));
            }

            let response = if first {
                None
            } else {
                state.scripted.get_mut(&index).and_then(|q| q.pop_front())
            };

            let samples: Vec<RawSample> = match response {
                Some(Response::Fail(message)) => {
                    return Err(DeviceError::Query(message.to_string()));
                }
                Some(Response::Samples(samples)) => samples
                    .into_iter()
                    .map(|(t, v)| RawSample::new(t, v))
                    .collect(),
                None => state
                    .history
                    .get(&index)
                    .map(|h| h.iter().filter(|s| s.timestamp > since).copied().collect())
                    .unwrap_or_default(),
            };

            let encoding = if samples.is_empty() { None } else { state.encoding };

            Ok(SampleBatch { encoding, samples })
        })
    }

    fn power_usage(&self, index: u32) -> Result<u32, DeviceError> {
        if index == 1 {
            return Err(DeviceError::Query("not supported".to_string()));
        }

        Ok(150_000 + index)
    }

    fn utilization(&self, _index: u32) -> Result<Utilization, DeviceError> {
        Ok(Utilization { gpu: 40, memory: 10 })
    }

    fn clock(&self, _index: u32, domain: ClockDomain) -> Result<u32, DeviceError> {
        Ok(match domain {
            ClockDomain::Sm => 1500,
            ClockDomain::Memory => 7000,
        })
    }

    fn supported_clocks(&self, _index: u32) -> Result<Vec<ClockPair>, DeviceError> {
        Ok(vec![ClockPair {
            memory_clock: 7000,
            graphics_clocks: vec![1500, 1200],
        }])
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        self.with(|state| {
            state.releases += 1;

            if state.release_fails {
                Err(DeviceError::Query("release failed".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

pub fn base_name(dir: &Path) -> String {
    dir.join("log").to_string_lossy().into_owned()
}

pub fn read_log(dir: &Path, index: u32) -> String {
    fs::read_to_string(dir.join(format!("log_{index}.csv"))).unwrap()
}
