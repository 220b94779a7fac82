//! Resource usage of hypervisor nodes and virtual machines.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Power state of hypervisor node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    #[default]
    On,
    Off,
    Unknown,
}

impl Display for PowerState {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
            PowerState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Load thresholds of a node, expressed as the ratio of load to capacity.
///
/// A non-positive value means that the threshold is not configured and the corresponding load is not checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadThresholds {
    pub memory: f64,
    pub cpu: f64,
}

/// Value of an administrator-defined generic metric on a node.
///
/// `None` means that the value was not reported (or the threshold was not configured).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GMetric {
    pub load: Option<f64>,
    pub threshold: Option<f64>,
}

/// Usage of a hypervisor node as seen by the migration planning.
///
/// Memory is measured in MB, CPU load is the (fractional) number of processors in use.
/// Load values are absolute, ratios are computed against the node capacity when needed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeUsage {
    pub name: String,

    pub memory_load: u64,
    pub memory_allocated: u64,
    pub memory_total: u64,

    pub cpu_load: f64,
    pub cpu_allocated: u32,
    pub cpu_total: u32,

    pub thresholds: LoadThresholds,
    pub gmetrics: BTreeMap<String, GMetric>,
    pub power_state: PowerState,

    /// Names of VMs currently residing on the node.
    pub vms: Vec<String>,
}

impl NodeUsage {
    /// Creates usage of an idle node with specified capacity.
    pub fn new(name: &str, cpu_total: u32, memory_total: u64) -> Self {
        Self {
            name: name.to_string(),
            cpu_total,
            memory_total,
            ..Default::default()
        }
    }

    /// Ratio of memory load to memory capacity.
    pub fn memory_load_ratio(&self) -> f64 {
        self.memory_load as f64 / (self.memory_total as f64).max(1.)
    }

    /// Ratio of CPU load to CPU capacity.
    pub fn cpu_load_ratio(&self) -> f64 {
        self.cpu_load / (self.cpu_total as f64).max(1.)
    }

    /// Ratio of allocated memory to memory capacity.
    pub fn memory_allocation_ratio(&self) -> f64 {
        self.memory_allocated as f64 / (self.memory_total as f64).max(1.)
    }

    /// Ratio of allocated CPUs to CPU capacity.
    pub fn cpu_allocation_ratio(&self) -> f64 {
        self.cpu_allocated as f64 / (self.cpu_total as f64).max(1.)
    }

    /// Adds the demand of the specified VM to the node usage.
    ///
    /// Generic metrics which were not reported for the node stay unreported.
    pub fn add_vm(&mut self, vm: &VmUsage) {
        self.memory_load += vm.memory_load;
        self.memory_allocated += vm.memory_allocated;
        self.cpu_load += vm.cpu_load;
        self.cpu_allocated += vm.cpu_allocated;
        for (name, value) in vm.gmetrics.iter() {
            if let Some(load) = self.gmetrics.get_mut(name).and_then(|metric| metric.load.as_mut()) {
                *load += value;
            }
        }
    }

    /// Removes the demand of the specified VM from the node usage.
    ///
    /// Resource values do not go below zero, generic metrics are subtracted as is. Returns the demand which was
    /// actually removed, adding it back restores the previous usage.
    pub fn subtract_vm(&mut self, vm: &VmUsage) -> VmUsage {
        let mut removed = VmUsage {
            name: vm.name.clone(),
            node: self.name.clone(),
            memory_allocated: vm.memory_allocated.min(self.memory_allocated),
            memory_load: vm.memory_load.min(self.memory_load),
            cpu_allocated: vm.cpu_allocated.min(self.cpu_allocated),
            cpu_load: vm.cpu_load.min(self.cpu_load),
            ..Default::default()
        };
        self.memory_load -= removed.memory_load;
        self.memory_allocated -= removed.memory_allocated;
        self.cpu_load = (self.cpu_load - removed.cpu_load).max(0.);
        self.cpu_allocated -= removed.cpu_allocated;
        for (name, value) in vm.gmetrics.iter() {
            if let Some(load) = self.gmetrics.get_mut(name).and_then(|metric| metric.load.as_mut()) {
                *load -= value;
                removed.gmetrics.insert(name.clone(), *value);
            }
        }
        removed
    }
}

/// Resource demand of a virtual machine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VmUsage {
    pub name: String,
    /// Node the VM currently resides on.
    pub node: String,

    pub memory_allocated: u64,
    pub memory_load: u64,
    pub cpu_allocated: u32,
    pub cpu_load: f64,
    pub gmetrics: BTreeMap<String, f64>,

    /// Whether the VM can be picked for migration by a planning pass.
    pub migratable: bool,
    /// Destination of a migration which is already queued or running outside of the planning pass.
    pub migrating_to: Option<String>,
}

impl VmUsage {
    /// Creates usage of a migratable VM which fully uses its allocation.
    pub fn new(name: &str, node: &str, cpu: u32, memory: u64) -> Self {
        Self {
            name: name.to_string(),
            node: node.to_string(),
            memory_allocated: memory,
            memory_load: memory,
            cpu_allocated: cpu,
            cpu_load: cpu as f64,
            gmetrics: BTreeMap::new(),
            migratable: true,
            migrating_to: None,
        }
    }
}
