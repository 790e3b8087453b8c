use framejob::JobSystem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn main() {
    println!("Framejob - Per-Frame Work-Stealing Job Scheduler\n");

    let system = JobSystem::new();
    println!("Initialized job system with {} workers\n", system.worker_count());

    // Example 1: simple job execution
    println!("Example 1: Simple job execution");
    let job = system
        .spawn(|_| {
            println!("  Hello from a job!");
        })
        .expect("spawn failed");
    system.wait_for(&job);
    println!("  Job completed\n");

    // Example 2: fork/join
    println!("Example 2: Fork/join");
    let sum = Arc::new(AtomicUsize::new(0));
    let num_children = 100;

    let start = Instant::now();
    let sum_clone = Arc::clone(&sum);
    let parent = system
        .spawn(move |ctx| {
            for i in 0..num_children {
                let sum = Arc::clone(&sum_clone);
                ctx.spawn_child(move |_| {
                    sum.fetch_add(i, Ordering::SeqCst);
                })
                .expect("spawn_child failed");
            }
            ctx.wait_for_children();
        })
        .expect("spawn failed");
    system.wait_for(&parent);

    let expected: usize = (0..num_children).sum();
    println!("  Joined {} children in {:?}", num_children, start.elapsed());
    println!("  Sum: {} (expected {})\n", sum.load(Ordering::SeqCst), expected);

    // Example 3: throughput
    println!("Example 3: Throughput");
    let num_jobs = 10_000;
    let done = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let done_clone = Arc::clone(&done);
    let root = system
        .spawn(move |ctx| {
            let mut remaining = num_jobs;
            while remaining > 0 {
                let done = Arc::clone(&done_clone);
                match ctx.spawn_child(move |_| {
                    let mut x = 0usize;
                    for i in 0..10 {
                        x = x.wrapping_add(i);
                    }
                    std::hint::black_box(x);
                    done.fetch_add(1, Ordering::Relaxed);
                }) {
                    Ok(_) => remaining -= 1,
                    Err(_) => {
                        ctx.help();
                    }
                }
            }
            ctx.wait_for_children();
        })
        .expect("spawn failed");
    system.wait_for(&root);

    let duration = start.elapsed();
    let per_second = num_jobs as f64 / duration.as_secs_f64();
    println!("  Executed {} jobs in {:?}", done.load(Ordering::Relaxed), duration);
    println!("  Throughput: {:.2} jobs/second\n", per_second);

    println!("Shutting down job system...");
    match system.shutdown() {
        Ok(()) => println!("Done!"),
        Err(e) => eprintln!("Shutdown error: {}", e),
    }
}
