//! Port trait definitions (Hexagonal Architecture)
//!
//! - Clock: time source for timers and entity timestamps
//! - Fetcher: retrieval strategy behind cache misses and refreshes
//! - RequestExecutor: raw HTTP transport used by fetchers and cached requests

pub mod clock;
pub mod fetcher;
pub mod request;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fetcher::Fetcher;
pub use request::RequestExecutor;
