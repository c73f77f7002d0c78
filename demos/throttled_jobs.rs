//! Run a batch of simulated jobs through a concurrency limiter
//!
//! ```text
//! cargo run --example throttled_jobs -- --limit 4 --jobs 40 --work-ms 20 --deadline-ms 30 -v
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, ensure, Context, Result};
use clap::Parser;
use inflight::{ConcurrencyLimiter, LimiterConfig, LimiterError};
use tracing::{debug, info, Level};

/// Throttle simulated jobs with a bounded concurrency limiter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Maximum jobs running at once (0 or negative = unlimited)
    #[arg(long, default_value = "4", allow_negative_numbers = true)]
    limit: i32,

    /// Number of jobs to submit
    #[arg(long, default_value = "32")]
    jobs: usize,

    /// Simulated work per job, in milliseconds
    #[arg(long, default_value = "25")]
    work_ms: u64,

    /// Give up on admission after this many milliseconds (unset = wait forever)
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Reject argument combinations that cannot run
    fn validate(&self) -> Result<()> {
        ensure!(self.jobs > 0, "--jobs must be at least 1");
        if let Some(deadline) = self.deadline_ms {
            ensure!(deadline > 0, "--deadline-ms must be positive");
        }
        Ok(())
    }
}

/// Counters shared by all jobs
#[derive(Debug, Default)]
struct Stats {
    /// Jobs that ran to completion
    completed: AtomicUsize,
    /// Jobs whose deadline passed before admission
    cancelled: AtomicUsize,
    /// Jobs currently inside the limiter
    running: AtomicUsize,
    /// Highest value `running` reached
    peak: AtomicUsize,
}

#[compio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.quiet {
        Level::ERROR
    } else {
        match args.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    args.validate().context("Invalid arguments")?;

    let limiter = ConcurrencyLimiter::with_config(
        LimiterConfig::new()
            .with_capacity(args.limit)
            .with_name("jobs"),
    );
    info!("Capacity: {}", limiter.capacity());
    info!("Jobs: {}", args.jobs);

    let stats = Arc::new(Stats::default());
    let started = Instant::now();
    let work = Duration::from_millis(args.work_ms);
    let deadline = args.deadline_ms.map(Duration::from_millis);

    let mut handles = Vec::with_capacity(args.jobs);
    for job in 0..args.jobs {
        let limiter = limiter.clone();
        let stats = stats.clone();
        handles.push(compio::runtime::spawn(async move {
            run_job(job, &limiter, &stats, work, deadline).await
        }));
    }

    for handle in handles {
        handle.await.map_err(|_| anyhow!("job task panicked"))?;
    }
    limiter.wait_all().await;

    let elapsed = started.elapsed();
    info!("Completed: {}", stats.completed.load(Ordering::Relaxed));
    info!("Cancelled: {}", stats.cancelled.load(Ordering::Relaxed));
    info!("Peak concurrency: {}", stats.peak.load(Ordering::Relaxed));
    info!("Elapsed: {:?}", elapsed);

    ensure!(
        stats.peak.load(Ordering::Relaxed) <= limiter.capacity(),
        "limiter admitted more jobs than its capacity"
    );
    Ok(())
}

/// Wait for admission (bounded by `deadline` if set), then simulate `work`
async fn run_job(
    job: usize,
    limiter: &ConcurrencyLimiter,
    stats: &Stats,
    work: Duration,
    deadline: Option<Duration>,
) {
    let admitted = match deadline {
        Some(deadline) => {
            limiter
                .acquire_with_cancellation(compio::time::sleep(deadline))
                .await
        }
        None => {
            limiter.acquire().await;
            Ok(())
        }
    };

    if let Err(LimiterError::Cancelled) = admitted {
        debug!(job, "gave up waiting for a slot");
        stats.cancelled.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let running = stats.running.fetch_add(1, Ordering::Relaxed) + 1;
    stats.peak.fetch_max(running, Ordering::Relaxed);
    debug!(job, running, "job started");

    compio::time::sleep(work).await;

    stats.running.fetch_sub(1, Ordering::Relaxed);
    stats.completed.fetch_add(1, Ordering::Relaxed);
    limiter.release();
}
