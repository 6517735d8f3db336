//! Long-running operation driver.
//!
//! [`LroDriver::run`] submits one mutating call and then either returns the
//! operation handle right away ([`Mode::Async`]) or polls the operation to a
//! terminal state, optionally fetching the final resource, while emitting
//! progress events. `submit` is called exactly once; only the poll, fetch
//! and cancel requests are retried, by the request executor.
//!
//! [`LroDriver::wait_all`] waits on several already-submitted operations
//! together and collects their failures and warnings.

mod batch;
mod driver;
mod policy;

pub use batch::{BatchError, BatchOutcome, BatchRequest};
pub use driver::{LroDriver, LroOutcome, LroRequest, Mode, MAX_NOT_FOUND_POLLS};
pub use policy::{PollPlan, PollPolicy};
