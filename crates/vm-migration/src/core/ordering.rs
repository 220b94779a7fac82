//! Comparators shared by migration policies.
//!
//! All comparators put the element which should be processed first at the front when passed to `sort_by`.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::core::usage::{NodeUsage, VmUsage};

fn load_profile(node: &NodeUsage) -> [f64; 4] {
    [
        node.memory_load_ratio(),
        node.cpu_load_ratio(),
        node.memory_allocation_ratio(),
        node.cpu_allocation_ratio(),
    ]
}

/// Orders nodes from the least to the most loaded.
///
/// Nodes are compared by memory load, CPU load, allocated memory and allocated CPUs (all relative to capacity).
pub fn order_nodes_low_to_high_load(a: &NodeUsage, b: &NodeUsage) -> Ordering {
    load_profile(a)
        .iter()
        .zip(load_profile(b).iter())
        .map(|(x, y)| x.total_cmp(y))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Orders nodes from the most to the least loaded.
pub fn order_nodes_high_to_low_load(a: &NodeUsage, b: &NodeUsage) -> Ordering {
    order_nodes_low_to_high_load(b, a)
}

/// Orders VMs from the biggest to the smallest.
///
/// VMs are compared by memory load, CPU load, allocated memory and allocated CPUs.
pub fn order_vms_big_to_small(a: &VmUsage, b: &VmUsage) -> Ordering {
    b.memory_load
        .cmp(&a.memory_load)
        .then_with(|| b.cpu_load.total_cmp(&a.cpu_load))
        .then_with(|| b.memory_allocated.cmp(&a.memory_allocated))
        .then_with(|| b.cpu_allocated.cmp(&a.cpu_allocated))
}

/// Returns the ratio if it exceeds a configured (positive) threshold.
fn excess(ratio: f64, threshold: f64) -> Option<f64> {
    if threshold > 0. && ratio > threshold {
        Some(ratio)
    } else {
        None
    }
}

/// Node over the threshold goes first, if both are over the threshold the bigger ratio goes first.
fn compare_excess(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn gmetric_excess(node: &NodeUsage, name: &str) -> Option<f64> {
    let metric = node.gmetrics.get(name)?;
    match (metric.load, metric.threshold) {
        (Some(load), Some(threshold)) if threshold > 0. => excess(load / threshold, 1.),
        _ => None,
    }
}

fn compare_gmetrics(a: &NodeUsage, b: &NodeUsage) -> Ordering {
    let names: BTreeSet<&String> = a.gmetrics.keys().chain(b.gmetrics.keys()).collect();
    names
        .into_iter()
        .map(|name| compare_excess(gmetric_excess(a, name), gmetric_excess(b, name)))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// Orders nodes from the most to the least overcommitted.
///
/// Resources are examined in the order memory load, CPU load, allocated memory, allocated CPUs and generic metrics.
/// For each resource a node exceeding its threshold goes before a node which does not, and among two nodes exceeding
/// it the one with the bigger ratio goes first. Nodes within all thresholds are ordered from the most to the least
/// loaded.
pub fn order_nodes_most_overcommitted(a: &NodeUsage, b: &NodeUsage) -> Ordering {
    compare_excess(
        excess(a.memory_load_ratio(), a.thresholds.memory),
        excess(b.memory_load_ratio(), b.thresholds.memory),
    )
    .then_with(|| {
        compare_excess(
            excess(a.cpu_load_ratio(), a.thresholds.cpu),
            excess(b.cpu_load_ratio(), b.thresholds.cpu),
        )
    })
    .then_with(|| {
        compare_excess(
            excess(a.memory_allocation_ratio(), 1.),
            excess(b.memory_allocation_ratio(), 1.),
        )
    })
    .then_with(|| {
        compare_excess(
            excess(a.cpu_allocation_ratio(), 1.),
            excess(b.cpu_allocation_ratio(), 1.),
        )
    })
    .then_with(|| compare_gmetrics(a, b))
    .then_with(|| order_nodes_high_to_low_load(a, b))
}
