use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};

use crate::clock::ManualClock;
use crate::error::ComputeError;

/// A long CPU-bound computation that can be advanced one iteration at a time.
///
/// The accumulated result lives inside the workload and is only touched by
/// [`Workload::step`], so the final value depends on the iteration sequence
/// alone, never on how iterations were grouped into chunks.
pub trait Workload {
    /// Number of iterations in the whole computation.
    fn total(&self) -> u64;

    /// Run iteration `index`. Called with `0..total()` in order.
    fn step(&mut self, index: u64) -> Result<(), ComputeError>;

    /// Produce the result once every iteration has run.
    fn finish(self: Box<Self>) -> Bytes;
}

/// Bytes of randomness hashed per iteration.
pub const HASH_BLOCK: usize = 100;

/// The demonstration computation: hex-encode 100 pseudo-random bytes per
/// iteration and feed them into a running SHA-256.
///
/// The generator is seeded so runs are reproducible; the result is the hex
/// digest followed by a newline.
pub struct HashWorkload {
    iterations: u64,
    rng: StdRng,
    hasher: Sha256,
    block: [u8; HASH_BLOCK],
}

impl HashWorkload {
    pub fn new(iterations: u64, seed: u64) -> Self {
        Self {
            iterations,
            rng: StdRng::seed_from_u64(seed),
            hasher: Sha256::new(),
            block: [0; HASH_BLOCK],
        }
    }
}

impl Workload for HashWorkload {
    fn total(&self) -> u64 {
        self.iterations
    }

    fn step(&mut self, _index: u64) -> Result<(), ComputeError> {
        self.rng.fill_bytes(&mut self.block);
        self.hasher.update(hex::encode(self.block).as_bytes());
        Ok(())
    }

    fn finish(self: Box<Self>) -> Bytes {
        let mut out = hex::encode(self.hasher.finalize());
        out.push('\n');
        Bytes::from(out)
    }
}

impl fmt::Debug for HashWorkload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashWorkload")
            .field("iterations", &self.iterations)
            .finish()
    }
}

/// Charges a fixed amount of virtual CPU time per iteration.
///
/// Wraps another workload and advances a [`ManualClock`] on every step, so a
/// computation "takes" a deterministic amount of loop time regardless of the
/// host machine.
pub struct SimulatedCost {
    inner: Box<dyn Workload>,
    clock: Rc<ManualClock>,
    per_step: Duration,
}

impl SimulatedCost {
    pub fn new(inner: Box<dyn Workload>, clock: Rc<ManualClock>, per_step: Duration) -> Self {
        Self {
            inner,
            clock,
            per_step,
        }
    }

    /// Spread `total` evenly over the inner workload's iterations.
    pub fn spread(inner: Box<dyn Workload>, clock: Rc<ManualClock>, total: Duration) -> Self {
        let steps = inner.total().max(1);
        let per_step = total / u32::try_from(steps).unwrap_or(u32::MAX);
        Self::new(inner, clock, per_step)
    }

    pub fn per_step(&self) -> Duration {
        self.per_step
    }
}

impl Workload for SimulatedCost {
    fn total(&self) -> u64 {
        self.inner.total()
    }

    fn step(&mut self, index: u64) -> Result<(), ComputeError> {
        self.clock.advance(self.per_step);
        self.inner.step(index)
    }

    fn finish(self: Box<Self>) -> Bytes {
        self.inner.finish()
    }
}
