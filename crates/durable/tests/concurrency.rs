//! Concurrent claimers and lease holders never share a job or a slot.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use reelcast_durable::{Completion, FileJobQueue, LeaseRegistry};
use reelcast_job_model::{BrandingProfile, Job, LeasePurpose, Orientation};

#[test]
fn test_concurrent_claims_are_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let queue = FileJobQueue::open(dir.path().join("queue")).unwrap();
    for i in 0..60 {
        let job = Job::manual(
            format!("/clips/ball_{i}.mp4"),
            "final",
            Some(Orientation::Standard),
            BrandingProfile::default(),
        );
        queue.enqueue(&job).unwrap();
    }

    let workers = 6;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let queue = queue.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut claimed = Vec::new();
                while let Some(job) = queue.claim().unwrap() {
                    queue
                        .complete(
                            &job.job_id,
                            Completion::Succeeded {
                                output: format!("/out/{}.mp4", job.job_id).into(),
                            },
                        )
                        .unwrap();
                    claimed.push(job.job_id);
                }
                claimed
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }
    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), 60);
    assert_eq!(unique.len(), 60);

    let depth = queue.depth().unwrap();
    assert_eq!(depth.pending, 0);
    assert_eq!(depth.processing, 0);
    assert_eq!(depth.done, 60);
}

#[test]
fn test_concurrent_lease_holders_never_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let registry = LeaseRegistry::open(dir.path().join("registry"), 2).unwrap();
    let holders = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = registry.clone();
            let holders = holders.clone();
            let peak = peak.clone();
            thread::spawn(move || {
                for round in 0..5 {
                    let purpose = LeasePurpose::Render {
                        job_id: format!("job-{i}-{round}"),
                    };
                    let guard = registry
                        .acquire_with_timeout(
                            purpose,
                            &format!("worker-{i}"),
                            std::time::Duration::from_secs(30),
                            None,
                        )
                        .unwrap();
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(std::time::Duration::from_millis(5));
                    holders.fetch_sub(1, Ordering::SeqCst);
                    drop(guard);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(registry.entries().unwrap().is_empty());
}
