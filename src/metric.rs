use core::fmt;
use std::str::FromStr;

use crate::errors::SamplerError;

// The physical quantity sampled by a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Power,
    MemoryUtilization,
    GpuUtilization,
    ProcessorClock,
    MemoryClock,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Power,
        MetricKind::MemoryUtilization,
        MetricKind::GpuUtilization,
        MetricKind::ProcessorClock,
        MetricKind::MemoryClock,
    ];

    // Return the column label used in the log header
    pub fn label(&self) -> &'static str {
        match self {
            MetricKind::Power => "Power",
            MetricKind::MemoryUtilization => "Memory Util",
            MetricKind::GpuUtilization => "GPU Util",
            MetricKind::ProcessorClock => "GPU Clk",
            MetricKind::MemoryClock => "Memory Clk",
        }
    }

    // Encoding assumed when the probe query returns no samples,
    // NVML reports all the supported kinds as unsigned int
    pub fn default_encoding(&self) -> ValueEncoding {
        ValueEncoding::UnsignedInt
    }

    // Return the raw NVML sampling type id
    pub fn raw(&self) -> u32 {
        match self {
            MetricKind::Power => 0,
            MetricKind::GpuUtilization => 1,
            MetricKind::MemoryUtilization => 2,
            MetricKind::ProcessorClock => 5,
            MetricKind::MemoryClock => 6,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// Convert a raw NVML sampling type id, encoder and
// decoder utilization are not supported
impl TryFrom<u32> for MetricKind {
    type Error = SamplerError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(MetricKind::Power),
            1 => Ok(MetricKind::GpuUtilization),
            2 => Ok(MetricKind::MemoryUtilization),
            5 => Ok(MetricKind::ProcessorClock),
            6 => Ok(MetricKind::MemoryClock),
            other => Err(SamplerError::UnsupportedMetric(format!(
                "sampling type {other}"
            ))),
        }
    }
}

impl FromStr for MetricKind {
    type Err = SamplerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");

        match name.as_str() {
            "power" => Ok(MetricKind::Power),
            "memory_util" | "mem_util" | "memory_utilization" => {
                Ok(MetricKind::MemoryUtilization)
            }
            "gpu_util" | "gpu_utilization" => Ok(MetricKind::GpuUtilization),
            "gpu_clk" | "processor_clk" | "processor_clock" => {
                Ok(MetricKind::ProcessorClock)
            }
            "memory_clk" | "mem_clk" | "memory_clock" => {
                Ok(MetricKind::MemoryClock)
            }
            _ => Err(SamplerError::UnsupportedMetric(s.to_string())),
        }
    }
}

// Numeric representation of the sample values, numbered as NVML does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueEncoding {
    Double,
    UnsignedInt,
    UnsignedLong,
    UnsignedLongLong,
    SignedLongLong,
    SignedInt,
    UnsignedShort,
}

impl ValueEncoding {
    pub fn from_raw(raw: u32) -> Option<ValueEncoding> {
        match raw {
            0 => Some(ValueEncoding::Double),
            1 => Some(ValueEncoding::UnsignedInt),
            2 => Some(ValueEncoding::UnsignedLong),
            3 => Some(ValueEncoding::UnsignedLongLong),
            4 => Some(ValueEncoding::SignedLongLong),
            5 => Some(ValueEncoding::SignedInt),
            6 => Some(ValueEncoding::UnsignedShort),
            _ => None,
        }
    }

    // Interpret the raw payload bits with this encoding
    pub fn decode(&self, bits: u64) -> SampleValue {
        match self {
            ValueEncoding::Double => SampleValue::F64(f64::from_bits(bits)),
            ValueEncoding::UnsignedInt => SampleValue::U32(bits as u32),
            ValueEncoding::UnsignedLong | ValueEncoding::UnsignedLongLong => {
                SampleValue::U64(bits)
            }
            ValueEncoding::SignedLongLong => SampleValue::I64(bits as i64),
            ValueEncoding::SignedInt => SampleValue::I32(bits as u32 as i32),
            ValueEncoding::UnsignedShort => SampleValue::U16(bits as u16),
        }
    }
}

// A decoded sample value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    F64(f64),
    U32(u32),
    U64(u64),
    I64(i64),
    I32(i32),
    U16(u16),
}

impl SampleValue {
    // Return the raw payload bits, the inverse of ValueEncoding::decode
    pub fn to_bits(&self) -> u64 {
        match *self {
            SampleValue::F64(v) => v.to_bits(),
            SampleValue::U32(v) => v as u64,
            SampleValue::U64(v) => v,
            SampleValue::I64(v) => v as u64,
            SampleValue::I32(v) => v as u32 as u64,
            SampleValue::U16(v) => v as u64,
        }
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            // Whole doubles keep a decimal point so the column stays decimal
            SampleValue::F64(v) if v.is_finite() && v.fract() == 0.0 => {
                write!(f, "{v:.1}")
            }
            SampleValue::F64(v) => write!(f, "{v}"),
            SampleValue::U32(v) => write!(f, "{v}"),
            SampleValue::U64(v) => write!(f, "{v}"),
            SampleValue::I64(v) => write!(f, "{v}"),
            SampleValue::I32(v) => write!(f, "{v}"),
            SampleValue::U16(v) => write!(f, "{v}"),
        }
    }
}

// An undecoded sample as reported by the device provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub timestamp: u64,
    pub bits: u64,
}

impl RawSample {
    pub fn new(timestamp: u64, value: SampleValue) -> Self {
        Self {
            timestamp,
            bits: value.to_bits(),
        }
    }
}

// The result of a single samples query, ordered by timestamp
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleBatch {
    // None when the provider could not report the encoding
    pub encoding: Option<ValueEncoding>,
    pub samples: Vec<RawSample>,
}

impl SampleBatch {
    pub fn new(encoding: ValueEncoding, samples: Vec<RawSample>) -> Self {
        Self {
            encoding: Some(encoding),
            samples,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    // Timestamp of the newest sample in the batch
    pub fn newest(&self) -> Option<u64> {
        self.samples.last().map(|s| s.timestamp)
    }
}
