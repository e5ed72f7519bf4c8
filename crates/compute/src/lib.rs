//! Single-threaded cooperative runtime: event loop, chunked computations,
//! route dispatch and periodic health probing.

pub mod chunker;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod poller;
pub mod scenario;
pub mod scheduler;

pub use chunker::{
    run_as_one_chunk, run_fully_chunked, spawn_chunked, ChunkBudget, ChunkMode, ChunkOutcome,
    ChunkedJob, HashWorkload, SimulatedCost, WorkChunker, Workload,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{
    Dispatched, Dispatcher, Handler, PendingResponse, Request, RouteTable, RouteTableBuilder,
};
pub use error::{ComputeError, DispatchError, ProbeError, RouteError};
pub use poller::{
    DispatchProbe, HealthPoller, OutcomeLog, PollerState, PollerStats, Probe, ProbeAttempt,
    ProbeEvent, ProbeObserver, ProbeOutcome, TracingObserver,
};
pub use scheduler::{
    IoSource, IoStatus, Promise, Scheduler, SchedulerConfig, SchedulerMetrics, SettleToken, Task,
    TaskId, TimerId, TurnReport,
};
