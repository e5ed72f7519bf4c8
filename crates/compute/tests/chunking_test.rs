//! Chunking never changes a computation's result.
//!
//! Randomized over seeds, iteration counts and chunk sizes with a seeded
//! generator so failures are reproducible.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use turnloop_compute::{
    run_as_one_chunk, run_fully_chunked, spawn_chunked, ChunkBudget, HashWorkload, ManualClock,
    Scheduler, WorkChunker,
};

#[test]
fn yielding_matches_blocking_for_random_inputs() {
    let mut rng = StdRng::seed_from_u64(0xc0ffee);
    for _ in 0..40 {
        let seed: u64 = rng.gen();
        let iterations = rng.gen_range(0..400);
        let chunk = rng.gen_range(1..=iterations.max(1) + 5);

        let blocking = run_as_one_chunk(Box::new(HashWorkload::new(iterations, seed))).unwrap();
        let yielding =
            run_fully_chunked(Box::new(HashWorkload::new(iterations, seed)), chunk).unwrap();
        assert_eq!(
            blocking, yielding,
            "seed={seed} iterations={iterations} chunk={chunk}"
        );
    }
}

#[test]
fn interleaved_jobs_do_not_disturb_each_other() {
    let scheduler = Scheduler::with_clock(Rc::new(ManualClock::new()));
    let mut rng = StdRng::seed_from_u64(17);

    let mut jobs = Vec::new();
    let mut expected = Vec::new();
    for n in 0..6u64 {
        let iterations = rng.gen_range(10..200);
        let chunk = rng.gen_range(1..20);
        expected.push(run_as_one_chunk(Box::new(HashWorkload::new(iterations, n))).unwrap());
        jobs.push(spawn_chunked(
            &scheduler,
            format!("job-{n}"),
            WorkChunker::new(
                Box::new(HashWorkload::new(iterations, n)),
                ChunkBudget::Iterations(chunk),
            ),
        ));
    }

    scheduler.run_until_idle();
    for (job, want) in jobs.iter().zip(expected) {
        assert_eq!(job.try_take().unwrap().unwrap(), want, "{}", job.name());
    }
}

#[test]
fn competing_task_waits_at_most_one_chunk() {
    let scheduler = Scheduler::with_clock(Rc::new(ManualClock::new()));
    let order = Rc::new(RefCell::new(Vec::new()));

    let job = spawn_chunked(
        &scheduler,
        "long",
        WorkChunker::new(
            Box::new(HashWorkload::new(100, 1)),
            ChunkBudget::Iterations(10),
        ),
    );
    scheduler.turn();

    let o = order.clone();
    let j = job.clone();
    scheduler.spawn("competitor", move |_| {
        o.borrow_mut().push(j.is_finished());
    });
    scheduler.run_until_idle();

    assert_eq!(*order.borrow(), vec![false]);
    assert_eq!(scheduler.metrics().tasks_executed["long"], 10);
}
