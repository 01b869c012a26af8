//! Reconcile the queue and the registry after a crash.

use reelcast_common::config::AppConfig;
use reelcast_durable::{FileJobQueue, LeaseRegistry};

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    let queue = FileJobQueue::open(&config.paths.queue_dir)?;
    let registry = LeaseRegistry::open(&config.paths.registry_dir, config.render.encoder_slots)?;

    let report = queue.recover()?;
    let cleared = registry.reconcile()?;

    println!("Recovery complete");
    println!("  Jobs requeued: {}", report.requeued.len());
    for job_id in &report.requeued {
        println!("    {job_id}");
    }
    println!("  Completions finalized: {}", report.finalized.len());
    println!("  Still owned by live workers: {}", report.still_owned);
    println!("  Corrupt records quarantined: {}", report.quarantined);
    println!("  Staging files swept: {}", report.staging_swept);
    println!("  Orphaned leases cleared: {}", cleared.len());
    for lease in &cleared {
        println!("    slot {} (pid {}, {:?})", lease.slot, lease.owner_pid, lease.purpose);
    }
    Ok(())
}
