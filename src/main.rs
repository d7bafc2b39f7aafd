use anyhow::{Context, Result};
use moss_sampler::{
    Sampler, arg_parser::ArgsOptions, config::SamplerConfig, logger,
    poller::Poller,
};
use tokio::signal::ctrl_c;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_logging();

    // Parse the command line arguments
    let args_options = ArgsOptions::parse();

    let mut config = SamplerConfig::load(&args_options.config_file_path)?;
    args_options.apply(&mut config);

    // Reject a bad metric before touching NVML
    let metric = config.metric_kind()?;

    let mut sampler = Sampler::with_nvml(&config.log_base_name, metric)
        .with_context(|| "Failed to create the sampler")?;

    for device in sampler.devices() {
        info!(
            "Sampling device {}: {}",
            device.index,
            device.uuid.as_deref().unwrap_or("unknown uuid")
        );
    }

    sampler.write_header()?;

    if config.report_on_start {
        for report in sampler.report()? {
            report.log();
        }
    }

    if config.resync_on_start {
        info!("Skipping the samples buffered before start up");
        sampler.advance_watermark_only()?;
    }

    // This token and tracker will be used to handle graceful shutdown
    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    {
        let token = token.clone();
        let poller = Poller::new(sampler, config.interval());

        tracker.spawn(async move {
            let cycles = poller.run(token).await;
            info!("Completed {cycles} poll cycle(s)");
        });
    }

    ctrl_c().await?;

    // Cancel the token to communicate the program
    // termination to the running tasks
    token.cancel();

    // Wait for the tasks to finish
    tracker.close();
    tracker.wait().await;

    Ok(())
}
