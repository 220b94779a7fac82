//! Detection of overcommitted nodes.

use std::fmt::{Display, Formatter};

use crate::core::usage::NodeUsage;

/// Share of the configured load threshold used when a node is checked as a migration destination.
pub const LOW_THRESHOLD_FACTOR: f64 = 0.9;

/// The first limit found to be exceeded on a node.
#[derive(Clone, Debug, PartialEq)]
pub enum OvercommitViolation {
    MemoryLoad { ratio: f64, threshold: f64 },
    MemoryAllocation { allocated: u64, total: u64 },
    CpuLoad { ratio: f64, threshold: f64 },
    CpuAllocation { allocated: u32, total: u32 },
    GMetric { name: String, load: f64, threshold: f64 },
}

impl Display for OvercommitViolation {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            OvercommitViolation::MemoryLoad { ratio, threshold } => {
                write!(f, "memory load {:.3} > {:.3}", ratio, threshold)
            }
            OvercommitViolation::MemoryAllocation { allocated, total } => {
                write!(f, "allocated memory {} > {}", allocated, total)
            }
            OvercommitViolation::CpuLoad { ratio, threshold } => {
                write!(f, "cpu load {:.3} > {:.3}", ratio, threshold)
            }
            OvercommitViolation::CpuAllocation { allocated, total } => {
                write!(f, "allocated cpus {} > {}", allocated, total)
            }
            OvercommitViolation::GMetric { name, load, threshold } => {
                write!(f, "gmetric {} {} > {}", name, load, threshold)
            }
        }
    }
}

/// Returns the first exceeded limit of the node, checking memory load, memory allocation, CPU load, CPU allocation
/// and generic metrics in this order.
///
/// With `use_low_threshold` the load thresholds are scaled by [`LOW_THRESHOLD_FACTOR`]. Allocation limits and generic
/// metric thresholds are never scaled.
pub fn overcommit_violation(usage: &NodeUsage, use_low_threshold: bool) -> Option<OvercommitViolation> {
    let effective = |threshold: f64| {
        if use_low_threshold {
            threshold * LOW_THRESHOLD_FACTOR
        } else {
            threshold
        }
    };

    if usage.thresholds.memory > 0. {
        let threshold = effective(usage.thresholds.memory);
        let ratio = usage.memory_load_ratio();
        if ratio > threshold {
            return Some(OvercommitViolation::MemoryLoad { ratio, threshold });
        }
    }

    if usage.memory_allocated > usage.memory_total {
        return Some(OvercommitViolation::MemoryAllocation {
            allocated: usage.memory_allocated,
            total: usage.memory_total,
        });
    }

    if usage.thresholds.cpu > 0. {
        let threshold = effective(usage.thresholds.cpu);
        let ratio = usage.cpu_load_ratio();
        if ratio > threshold {
            return Some(OvercommitViolation::CpuLoad { ratio, threshold });
        }
    }

    if usage.cpu_allocated > usage.cpu_total {
        return Some(OvercommitViolation::CpuAllocation {
            allocated: usage.cpu_allocated,
            total: usage.cpu_total,
        });
    }

    for (name, metric) in usage.gmetrics.iter() {
        if let (Some(load), Some(threshold)) = (metric.load, metric.threshold) {
            if load > threshold {
                return Some(OvercommitViolation::GMetric {
                    name: name.clone(),
                    load,
                    threshold,
                });
            }
        }
    }

    None
}

/// Returns true if the node exceeds any of its limits (see [`overcommit_violation`]).
pub fn is_overcommitted(usage: &NodeUsage, use_low_threshold: bool) -> bool {
    overcommit_violation(usage, use_low_threshold).is_some()
}
