use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use dispatch_lite::config::{DispatchConfig, FeatureToggles, ReaperConfig};
use dispatch_lite::dispatch::arbiter::{LeaseArbiter, LeaseResult};
use dispatch_lite::dispatch::job::{Job, JobStatus};
use dispatch_lite::dispatch::runner::Runner;
use dispatch_lite::reaper::TimeoutReaper;
use dispatch_lite::shutdown::install_shutdown_handler;
use dispatch_lite::store::{JobStore, MemoryStore, RunnerRegistry};

#[derive(Parser, Debug)]
#[command(name = "dispatch-lite")]
#[command(version)]
#[command(about = "Simulate a runner fleet polling the lease arbiter")]
struct Args {
    /// Number of simulated runners polling for work
    #[arg(long, default_value = "4")]
    runners: usize,

    /// Concurrency budget per runner
    #[arg(long, default_value = "2")]
    budget: u32,

    /// Number of pending jobs to seed
    #[arg(long, default_value = "64")]
    jobs: usize,

    /// Number of store partitions
    #[arg(long, default_value = "2")]
    partitions: u32,

    /// Percentage of jobs requiring the "docker" tag (0-100)
    #[arg(long, default_value = "25")]
    tagged_percent: u32,

    /// Simulated execution time per job, in milliseconds
    #[arg(long, default_value = "150")]
    exec_ms: u64,

    /// Poll interval per runner, in milliseconds
    #[arg(long, default_value = "50")]
    poll_ms: u64,

    /// Reaper sweep interval, in milliseconds
    #[arg(long, default_value = "2000")]
    reap_interval_ms: u64,

    /// How long to run before draining, in seconds
    #[arg(long, default_value = "10")]
    duration_secs: u64,
}

#[derive(Debug, Default)]
struct Stats {
    assigned: AtomicU64,
    completed: AtomicU64,
    empty_polls: AtomicU64,
    capacity_polls: AtomicU64,
}

// =============================================================================
// Seeding
// =============================================================================

/// Seed a synthetic backlog: mostly pending jobs across partitions, plus a
/// few already-stuck running/canceling jobs so the reaper has work to do.
async fn seed_store(store: &MemoryStore, args: &Args) {
    let mut rng = rand::thread_rng();

    for i in 0..args.jobs {
        let partition_id = (i as u32) % args.partitions.max(1);
        let priority = (i % 4) as i32;
        let mut job = Job::new(partition_id, priority);
        if rng.gen_range(0..100) < args.tagged_percent {
            job = job.with_tags(["docker"]);
        }
        store.insert_job(job).await;
    }

    // Stuck jobs: started hours ago with a short timeout, well past the
    // default 900s buffer.
    for partition_id in 0..args.partitions.max(1) {
        let mut stuck_running = Job::new(partition_id, 0).with_timeout_seconds(60);
        stuck_running.status = JobStatus::Running;
        stuck_running.started_at = Some(chrono::Utc::now() - chrono::Duration::hours(3));
        store.insert_job(stuck_running).await;
    }
    let mut stuck_canceling = Job::new(0, 0).with_timeout_seconds(60);
    stuck_canceling.status = JobStatus::Canceling;
    stuck_canceling.started_at = Some(chrono::Utc::now() - chrono::Duration::hours(3));
    store.insert_job(stuck_canceling).await;

    for runner_id in 1..=args.runners as u64 {
        let mut runner = Runner::new(runner_id, args.budget);
        // Every other runner can serve docker-tagged jobs.
        if runner_id % 2 == 0 {
            runner = runner.with_tags(["docker"]).with_capabilities(["docker"]);
        }
        store.register_runner(runner).await;
    }
}

// =============================================================================
// Runner poll loop
// =============================================================================

async fn runner_loop(
    runner_id: u64,
    arbiter: Arc<LeaseArbiter>,
    store: Arc<MemoryStore>,
    stats: Arc<Stats>,
    exec_ms: u64,
    poll_ms: u64,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(poll_ms.max(1)));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                match arbiter.register(runner_id).await {
                    Ok(LeaseResult::Assigned(job)) => {
                        stats.assigned.fetch_add(1, Ordering::Relaxed);
                        let store = store.clone();
                        let stats = stats.clone();
                        // Execute "the job": hold a slot for a while, then
                        // report success. A job the reaper got to first is
                        // left alone by finish_job.
                        tokio::spawn(async move {
                            tokio::time::sleep(Duration::from_millis(exec_ms)).await;
                            match store.finish_job(job.id, JobStatus::Success).await {
                                Ok(true) => {
                                    stats.completed.fetch_add(1, Ordering::Relaxed);
                                }
                                Ok(false) => {}
                                Err(e) => {
                                    tracing::warn!(job_id = %job.id, error = %e, "Failed to finish job");
                                }
                            }
                        });
                    }
                    Ok(LeaseResult::NoJobAvailable) => {
                        stats.empty_polls.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(LeaseResult::RunnerAtCapacity) => {
                        stats.capacity_polls.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::warn!(runner_id, error = %e, "Registration failed");
                    }
                }
            }
        }
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        runners = args.runners,
        jobs = args.jobs,
        partitions = args.partitions,
        duration_secs = args.duration_secs,
        "Starting dispatch simulation"
    );

    let store = Arc::new(MemoryStore::new());
    seed_store(&store, &args).await;

    let job_store: Arc<dyn JobStore> = store.clone();
    let registry: Arc<dyn RunnerRegistry> = store.clone();
    let arbiter = Arc::new(LeaseArbiter::new(
        job_store.clone(),
        registry,
        DispatchConfig::default(),
    ));

    let reaper = TimeoutReaper::new(
        job_store,
        ReaperConfig::default().with_interval_ms(args.reap_interval_ms),
        FeatureToggles::default(),
    );

    let cancel = install_shutdown_handler();
    let stats = Arc::new(Stats::default());

    let reaper_cancel = cancel.clone();
    let reaper_handle = tokio::spawn(async move { reaper.run(reaper_cancel).await });

    let mut runner_handles = Vec::new();
    for runner_id in 1..=args.runners as u64 {
        runner_handles.push(tokio::spawn(runner_loop(
            runner_id,
            arbiter.clone(),
            store.clone(),
            stats.clone(),
            args.exec_ms,
            args.poll_ms,
            cancel.clone(),
        )));
    }

    // Run until the duration elapses or a signal arrives.
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {
            tracing::info!("Simulation duration elapsed, draining");
            cancel.cancel();
        }
    }

    for handle in runner_handles {
        let _ = handle.await;
    }
    let _ = reaper_handle.await;
    // Let in-flight executions settle before the final tally.
    tokio::time::sleep(Duration::from_millis(200)).await;

    print_summary(&store, &stats).await;
}

async fn print_summary(store: &MemoryStore, stats: &Stats) {
    let pending = store.jobs_with_status(JobStatus::Pending).await.len();
    let running = store.jobs_with_status(JobStatus::Running).await.len();
    let success = store.jobs_with_status(JobStatus::Success).await.len();
    let failed = store.jobs_with_status(JobStatus::Failed).await.len();

    println!("Simulation summary");
    println!("{}", "=".repeat(40));
    println!("Leases granted:    {}", stats.assigned.load(Ordering::Relaxed));
    println!("Jobs completed:    {}", stats.completed.load(Ordering::Relaxed));
    println!("Empty polls:       {}", stats.empty_polls.load(Ordering::Relaxed));
    println!("Capacity polls:    {}", stats.capacity_polls.load(Ordering::Relaxed));
    println!();
    println!("Store: {} pending, {} running, {} success, {} failed", pending, running, success, failed);
}
