//! Dispatch routing between on-demand and batch execution.

/// Where a set of staged work items should be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// No staged items; nothing to do
    Nothing,

    /// Below the inflection threshold: invoke synchronously
    OnDemand(usize),

    /// At or above the threshold: submit asynchronous batch jobs
    Batch(usize),
}

/// Route a pending-item count against the inflection threshold
pub fn decide(count: usize, threshold: usize) -> Dispatch {
    if count == 0 {
        Dispatch::Nothing
    } else if count < threshold {
        Dispatch::OnDemand(count)
    } else {
        Dispatch::Batch(count)
    }
}
