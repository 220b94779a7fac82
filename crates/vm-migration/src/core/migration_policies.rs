//! Implementations of VM migration policies.

pub mod consolidation;
pub mod consolidation_overcommit;
pub mod overcommit;
