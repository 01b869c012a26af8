//! List or reset hardware leases.

use reelcast_common::config::AppConfig;
use reelcast_common::process::pid_is_alive;
use reelcast_durable::LeaseRegistry;

pub fn run(config: &AppConfig, reset: bool) -> anyhow::Result<()> {
    let registry = LeaseRegistry::open(&config.paths.registry_dir, config.render.encoder_slots)?;

    if reset {
        let report = registry.force_reset()?;
        println!("Registry reset");
        println!("  Processes killed: {:?}", report.killed);
        println!("  Leases cleared: {:?}", report.leases_cleared);
        println!("  Sessions cleared: {:?}", report.sessions_cleared);
        return Ok(());
    }

    let entries = registry.entries()?;
    println!("Encoder slots: {} ({} in use)", registry.slots(), entries.len());
    for lease in &entries {
        println!(
            "  slot {}: {:?} pid {}{} session {} since {}",
            lease.slot,
            lease.purpose,
            lease.owner_pid,
            if pid_is_alive(lease.owner_pid) { "" } else { " (dead)" },
            lease.session_id,
            lease.acquired_at
        );
    }

    let sessions = registry.sessions()?;
    println!();
    println!("Stream sessions: {}", sessions.len());
    for session in &sessions {
        println!(
            "  {} ({}) pid {} since {}",
            session.stream_id,
            session.uri,
            session.owner_pid,
            session.started_at
        );
    }
    Ok(())
}
