//! Cross-module integration tests.

use crate::{JobOutcome, JobState, JobSystem, JobSystemConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn system_with(workers: usize) -> JobSystem {
    JobSystem::with_config(JobSystemConfig {
        worker_count: Some(workers),
        ..JobSystemConfig::default()
    })
}

#[test]
fn test_context_identifies_current_job() {
    let system = system_with(1);
    let saw_current = Arc::new(AtomicUsize::new(0));
    let saw_clone = Arc::clone(&saw_current);

    let job = system
        .spawn(move |ctx| {
            if ctx.current_job().is_some() {
                saw_clone.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    system.wait_for(&job);
    assert_eq!(saw_current.load(Ordering::SeqCst), 1);
}

#[test]
fn test_nested_spawns_complete() {
    let system = system_with(4);
    let executed = Arc::new(AtomicUsize::new(0));
    let executed_clone = Arc::clone(&executed);

    let root = system
        .spawn(move |ctx| {
            for _ in 0..5 {
                let executed = Arc::clone(&executed_clone);
                ctx.spawn_child(move |ctx| {
                    executed.fetch_add(1, Ordering::SeqCst);
                    let executed = Arc::clone(&executed);
                    let grandchild = ctx
                        .spawn_child(move |_| {
                            executed.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                    ctx.wait_for(&grandchild);
                })
                .unwrap();
            }
            ctx.wait_for_children();
        })
        .unwrap();

    system.wait_for(&root);
    assert_eq!(executed.load(Ordering::SeqCst), 10);
    assert_eq!(root.outcome(), JobOutcome::Succeeded);
}

#[test]
fn test_panicking_job_is_contained() {
    let system = system_with(2);

    let bad = system
        .spawn(|_| {
            panic!("boom");
        })
        .unwrap();
    system.wait_for(&bad);
    assert_eq!(bad.state(), JobState::Completed);
    assert_eq!(bad.outcome(), JobOutcome::Failed);

    // The system keeps scheduling afterwards.
    let ok = system.spawn(|_| {}).unwrap();
    system.wait_for(&ok);
    assert_eq!(ok.outcome(), JobOutcome::Succeeded);

    system.shutdown().expect("workers must survive a job panic");
}

#[test]
fn test_detached_jobs_run() {
    let system = system_with(2);
    let executed = Arc::new(AtomicUsize::new(0));
    let executed_clone = Arc::clone(&executed);

    let root = system
        .spawn(move |ctx| {
            for _ in 0..4 {
                let executed = Arc::clone(&executed_clone);
                ctx.spawn_detached(move |_| {
                    executed.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
        })
        .unwrap();

    system.wait_for(&root);
    // Detached jobs are not part of the root's join; drain them explicitly.
    while executed.load(Ordering::SeqCst) < 4 {
        if !system.help() {
            std::thread::yield_now();
        }
    }
    assert_eq!(executed.load(Ordering::SeqCst), 4);
}

#[test]
fn test_sibling_jobs_all_run_under_contention() {
    let system = system_with(4);
    let executed = Arc::new(AtomicUsize::new(0));
    let num_jobs = 500;
    let executed_clone = Arc::clone(&executed);

    let root = system
        .spawn(move |ctx| {
            let mut remaining = num_jobs;
            while remaining > 0 {
                let executed = Arc::clone(&executed_clone);
                match ctx.spawn_child(move |_| {
                    executed.fetch_add(1, Ordering::SeqCst);
                }) {
                    Ok(_) => remaining -= 1,
                    // Saturated: run something ourselves to make room.
                    Err(_) => {
                        ctx.help();
                    }
                }
            }
            ctx.wait_for_children();
        })
        .unwrap();

    system.wait_for(&root);
    assert_eq!(executed.load(Ordering::SeqCst), num_jobs);
}

#[cfg(feature = "metrics")]
#[test]
fn test_metrics_count_completed_jobs() {
    let system = system_with(2);
    for _ in 0..10 {
        let job = system.spawn(|_| {}).unwrap();
        system.wait_for(&job);
    }
    let snapshot = system.metrics();
    assert!(snapshot.jobs_completed >= 10);
    assert!(snapshot.queue_pushes >= 10);
}
