//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - [`Dispatcher`]: Delivers decoded records to a domain's consumers

mod dispatch;

pub use dispatch::{DispatchReport, Dispatcher};
