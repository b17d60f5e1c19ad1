//! The generic worker dispatcher (component C1's sibling, consumed rather
//! than implemented): "submit a callable to a background worker". The
//! library never spawns a thread itself; it hands a boxed job to whatever
//! `Scheduler` the caller wired up.

use error::Error;

/// One unit of work submitted by `Connection::schedule_send`: the send
/// job described in spec.md S4.5. Boxed because its size depends on the
/// captured request/response/connection handles.
pub type Job = Box<dyn FnOnce() + Send>;

pub trait Scheduler: Send + Sync {
    /// Submit `job` for execution on a background worker. Returns
    /// `Error::AsyncSchedulingError` if the job could not be accepted
    /// (queue full, worker shut down, ...); the job is dropped in that
    /// case without running.
    fn schedule(&self, job: Job) -> Result<(), Error>;
}

/// A `Scheduler` that runs every job on a freshly spawned `std::thread`.
/// Not what an embedded target would use (it allocates a stack per job),
/// but a faithful, dependency-free default for tests and simple hosts --
/// the same role the teacher's `futures_cpupool::CpuPool` dev-dependency
/// plays for its own examples.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn schedule(&self, job: Job) -> Result<(), Error> {
        ::std::thread::Builder::new()
            .name("https-client-worker".into())
            .spawn(job)
            .map(|_| ())
            .map_err(|_| Error::AsyncSchedulingError)
    }
}
