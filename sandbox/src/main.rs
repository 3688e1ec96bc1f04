// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Tessel Sandbox
// Runs synthetic frames for the engine's five consumer subsystems and prints
// the final scheduler snapshot as JSON.
//
// Usage: sandbox [config.ron] [frames]

mod consumers;

use std::sync::Arc;

use anyhow::{Context, Result};
use consumers::Consumer;
use tessel_control::{FrameScheduler, SchedulerConfig, Workload};
use tessel_infra::{HardwareProbe, WorkerPool};

const DEFAULT_FRAMES: u64 = 1200;

struct Args {
    config: Option<String>,
    frames: u64,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = std::env::args().skip(1);
        let config = args.next();
        let frames = match args.next() {
            Some(text) => text
                .parse()
                .with_context(|| format!("frame count '{text}' is not a number"))?,
            None => DEFAULT_FRAMES,
        };
        Ok(Self { config, frames })
    }
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse()?;
    let config = match &args.config {
        Some(path) => SchedulerConfig::load(path)
            .with_context(|| format!("cannot use scheduler configuration '{path}'"))?,
        None => SchedulerConfig::default(),
    };

    let profile = HardwareProbe::new(config.hardware.min_threads)
        .with_override(config.hardware.thread_override)
        .probe();
    let pool = WorkerPool::from_profile(profile, config.pool.queue_capacity)?;
    let mut scheduler = FrameScheduler::new(config, profile, Arc::new(pool))?;
    let mut consumers = consumers::build(&scheduler)?;

    let mut over_budget = 0u64;
    for frame in 0..args.frames {
        scheduler.begin_frame();

        let workloads: Vec<Workload> = consumers
            .iter_mut()
            .map(|consumer| Workload::new(consumer.id(), consumer.prepare(&mut scheduler, frame)))
            .collect();
        let plan = scheduler.plan_frame(&workloads);

        for consumer in &consumers {
            let Some(subsystem_plan) = plan.get(consumer.id()) else {
                continue;
            };
            if subsystem_plan.item_count == 0 {
                continue;
            }
            let report = scheduler.execute(subsystem_plan, consumer.batches(subsystem_plan));
            if report.is_partial_failure() {
                log::warn!(
                    "Sandbox: {} lost {} batch(es) in frame {}",
                    consumer.id(),
                    report.failed,
                    frame
                );
            }
        }

        if scheduler.end_frame().over_budget {
            over_budget += 1;
        }
    }

    log::info!(
        "Sandbox: {} frame(s) run, {} over the {:.2}ms budget",
        args.frames,
        over_budget,
        scheduler.config().frame.target_frame_ms
    );

    let snapshot = scheduler.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    scheduler.shutdown();
    Ok(())
}
