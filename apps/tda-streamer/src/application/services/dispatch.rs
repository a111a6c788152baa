//! Record Dispatch
//!
//! Delivers decoded records to the consumers registered for a domain, in
//! registration order. A failing or panicking consumer is logged and
//! skipped; it never stops delivery to the consumers after it.

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::domain::fields::Domain;
use crate::domain::record::CanonicalRecord;
use crate::domain::subscription::SubscriptionRegistry;

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    /// Consumers invoked.
    pub delivered: usize,
    /// Consumers that returned an error or panicked.
    pub failed: usize,
}

/// Routes records to registered consumers.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: SubscriptionRegistry,
}

impl Dispatcher {
    /// Create a dispatcher reading from `registry`.
    #[must_use]
    pub const fn new(registry: SubscriptionRegistry) -> Self {
        Self { registry }
    }

    /// Deliver `records` to every consumer of `domain`.
    ///
    /// Returns `None` when the domain has no live descriptor, in which case
    /// the records are dropped. Bindings are cloned out of the registry
    /// before any callback runs, so a consumer may subscribe or unsubscribe
    /// from inside its callback without deadlocking.
    pub fn dispatch(&self, domain: Domain, records: &[CanonicalRecord]) -> Option<DispatchReport> {
        let bindings = self.registry.bindings(domain)?;
        let mut report = DispatchReport::default();
        if records.is_empty() {
            return Some(report);
        }

        for (position, binding) in bindings.iter().enumerate() {
            report.delivered += 1;
            match catch_unwind(AssertUnwindSafe(|| binding.invoke(records))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(
                        domain = %domain,
                        consumer = position,
                        error = %e,
                        "Consumer failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::error!(domain = %domain, consumer = position, "Consumer panicked");
                }
            }
        }

        Some(report)
    }
}
