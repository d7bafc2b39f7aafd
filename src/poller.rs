use std::time::Duration;

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace_span};

use crate::{errors::error_chain, sampler::Sampler};

// Drive a sampler at a fixed interval
pub struct Poller {
    sampler: Sampler,
    interval: Duration,
}

impl Poller {
    pub fn new(sampler: Sampler, interval: Duration) -> Self {
        Self { sampler, interval }
    }

    // Run the poller until the token is cancelled, then tear
    // the sampler down. Return the number of completed cycles
    pub async fn run(mut self, run_token: CancellationToken) -> usize {
        info!("Poller: Running every {:?}", self.interval);

        let mut cycles = 0;

        loop {
            select! {
                _ = run_token.cancelled() => {
                    info!("Poller: Quiting");

                    if let Err(err) = self.sampler.teardown() {
                        error!("{}", error_chain(&err));
                    }

                    break;
                },
                _ = tokio::time::sleep(self.interval) => {
                    let result = trace_span!("polling")
                        .in_scope(|| self.sampler.poll_and_log());

                    // Per device failures are logged by the sampler,
                    // only a state error stops the loop
                    if let Err(err) = result {
                        error!("Poller: {}", error_chain(&err));
                        break;
                    }

                    cycles += 1;
                }
            }
        }

        cycles
    }
}
