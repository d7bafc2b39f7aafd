use std::path::PathBuf;

use argparse::{ArgumentParser, Print, Store, StoreOption, StoreTrue};

use crate::config::SamplerConfig;

pub struct ArgsOptions {
    pub config_file_path: PathBuf,

    // Values overriding the configuration file
    pub log_base_name: Option<String>,
    pub metric: Option<String>,
    pub interval_ms: Option<u64>,
    pub resync: bool,
    pub report: bool,
}

impl ArgsOptions {
    pub fn parse() -> Self {
        let mut options = ArgsOptions::default();

        {
            let mut parser = ArgumentParser::new();
            parser.set_description("Log NVML device samples to CSV files");

            // Configuration file path
            parser.refer(&mut options.config_file_path).add_option(
                &["-c", "--config"],
                Store,
                "The file path of the configuration file",
            );

            parser.refer(&mut options.log_base_name).add_option(
                &["-o", "--output"],
                StoreOption,
                "Base name of the log files, <base>_<index>.csv",
            );

            parser.refer(&mut options.metric).add_option(
                &["-m", "--metric"],
                StoreOption,
                "Sampled metric: power, gpu_util, memory_util, gpu_clk, memory_clk",
            );

            parser.refer(&mut options.interval_ms).add_option(
                &["-i", "--interval"],
                StoreOption,
                "Delay between two polls in milliseconds",
            );

            parser.refer(&mut options.resync).add_option(
                &["--resync"],
                StoreTrue,
                "Skip the samples already buffered by the driver",
            );

            parser.refer(&mut options.report).add_option(
                &["--report"],
                StoreTrue,
                "Log a snapshot of every device before sampling",
            );

            // Show the version
            parser.add_option(
                &["-V", "--version"],
                Print(env!("CARGO_PKG_VERSION").to_string()),
                "Show the sampler version",
            );

            parser.parse_args_or_exit();
        }

        options
    }

    // Apply the command line values on top of the configuration
    pub fn apply(&self, config: &mut SamplerConfig) {
        if let Some(base) = &self.log_base_name {
            config.log_base_name = base.clone();
        }
        if let Some(metric) = &self.metric {
            config.metric = metric.clone();
        }
        if let Some(interval_ms) = self.interval_ms {
            config.interval_ms = interval_ms;
        }

        config.resync_on_start |= self.resync;
        config.report_on_start |= self.report;
    }
}

impl Default for ArgsOptions {
    fn default() -> Self {
        Self {
            config_file_path: PathBuf::from("moss/sampler.json"),
            log_base_name: None,
            metric: None,
            interval_ms: None,
            resync: false,
            report: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_config_values() {
        let options = ArgsOptions {
            log_base_name: Some("out/clk".to_string()),
            metric: Some("gpu_clk".to_string()),
            interval_ms: Some(50),
            resync: true,
            ..Default::default()
        };

        let mut config = SamplerConfig::default();
        options.apply(&mut config);

        assert_eq!(config.log_base_name, "out/clk");
        assert_eq!(config.metric, "gpu_clk");
        assert_eq!(config.interval_ms, 50);
        assert!(config.resync_on_start);
        assert!(!config.report_on_start);
    }

    #[test]
    fn no_overrides_keep_config() {
        let mut config = SamplerConfig {
            report_on_start: true,
            ..Default::default()
        };

        ArgsOptions::default().apply(&mut config);

        assert_eq!(config.log_base_name, "log");
        assert!(config.report_on_start);
    }
}
