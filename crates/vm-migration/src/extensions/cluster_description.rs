//! Cluster state described in YAML file.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::collaborators::{ClusterServices, FeasibilityWindow, RepresentativeJob};
use crate::core::config::{ConfigError, MigrationConfig};
use crate::core::ledger::UsageLedger;
use crate::core::usage::{GMetric, LoadThresholds, NodeUsage, PowerState, VmUsage};

fn yes() -> bool {
    true
}

/// Time interval during which a host is reserved.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ReservationDescription {
    pub name: String,
    pub start: f64,
    pub end: f64,
}

/// Holds description of a single hypervisor host.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct HostDescription {
    pub name: String,
    /// Host CPU capacity.
    pub cpus: u32,
    /// Host memory capacity in MB.
    pub memory: u64,
    /// Reported CPU load, the sum of loads of resident VMs if absent.
    pub cpu_load: Option<f64>,
    /// Reported memory load in MB, the sum of loads of resident VMs if absent.
    pub memory_load: Option<u64>,
    /// Memory load threshold overriding the configured one.
    pub memory_load_threshold: Option<f64>,
    /// CPU load threshold overriding the configured one.
    pub cpu_load_threshold: Option<f64>,
    /// Reported values of generic metrics.
    #[serde(default = "BTreeMap::new")]
    pub gmetrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub power: PowerState,
    /// Hypervisor type, hosts without hypervisor never take part in migrations.
    pub hypervisor: Option<String>,
    #[serde(default = "Vec::new")]
    pub vlans: Vec<String>,
    #[serde(default = "BTreeSet::new")]
    pub features: BTreeSet<String>,
    #[serde(default = "Vec::new")]
    pub reservations: Vec<ReservationDescription>,
    #[serde(default = "yes")]
    pub allow_migrations: bool,
}

/// Holds description of a single VM.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct VmDescription {
    pub name: String,
    /// Host the VM resides on.
    pub host: String,
    pub cpus: u32,
    /// Allocated memory in MB.
    pub memory: u64,
    /// CPU load, equals to allocated CPUs if absent.
    pub cpu_load: Option<f64>,
    /// Memory load in MB, equals to allocated memory if absent.
    pub memory_load: Option<u64>,
    #[serde(default = "BTreeMap::new")]
    pub gmetrics: BTreeMap<String, f64>,
    /// Node features required by the VM.
    #[serde(default = "BTreeSet::new")]
    pub features: BTreeSet<String>,
    /// Network the destination must belong to.
    pub vlan: Option<String>,
    /// Hypervisor type required by the VM.
    pub hypervisor: Option<String>,
    #[serde(default = "yes")]
    pub migratable: bool,
    /// Destination of already running migration.
    pub migrating_to: Option<String>,
}

impl VmDescription {
    fn usage(&self) -> VmUsage {
        VmUsage {
            name: self.name.clone(),
            node: self.host.clone(),
            memory_allocated: self.memory,
            memory_load: self.memory_load.unwrap_or(self.memory),
            cpu_allocated: self.cpus,
            cpu_load: self.cpu_load.unwrap_or(self.cpus as f64),
            gmetrics: self.gmetrics.clone(),
            migratable: self.migratable,
            migrating_to: self.migrating_to.clone(),
        }
    }
}

/// Holds raw cluster description parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawClusterDescription {
    pub time: Option<f64>,
    pub hosts: Option<Vec<HostDescription>>,
    pub vms: Option<Vec<VmDescription>>,
}

/// Cluster state (hosts, VMs and reservations) at some moment of time.
///
/// Provides cluster services to migration planning, so the planning can be run over a cluster state stored in a file.
#[derive(Debug, Clone)]
pub struct ClusterDescription {
    pub time: f64,
    pub hosts: Vec<HostDescription>,
    pub vms: Vec<VmDescription>,
    pub config: MigrationConfig,
}

impl ClusterDescription {
    /// Reads cluster description from YAML file.
    pub fn from_file(file_name: &str, config: MigrationConfig) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(file_name).map_err(|source| ConfigError::Io {
            path: file_name.to_string(),
            source,
        })?;
        Self::from_yaml(&data, config)
    }

    /// Reads cluster description from YAML string.
    pub fn from_yaml(data: &str, config: MigrationConfig) -> Result<Self, ConfigError> {
        let raw: RawClusterDescription = serde_yaml::from_str(data)?;
        let description = Self {
            time: raw.time.unwrap_or(0.),
            hosts: raw.hosts.unwrap_or_default(),
            vms: raw.vms.unwrap_or_default(),
            config,
        };
        for vm in description.vms.iter() {
            if description.host(&vm.host).is_none() {
                return Err(ConfigError::InvalidValue {
                    key: format!("host of vm {}", vm.name),
                    value: vm.host.clone(),
                });
            }
        }
        Ok(description)
    }

    pub fn host(&self, name: &str) -> Option<&HostDescription> {
        self.hosts.iter().find(|host| host.name == name)
    }

    pub fn vm(&self, name: &str) -> Option<&VmDescription> {
        self.vms.iter().find(|vm| vm.name == name)
    }

    fn resident_vms<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a VmDescription> + 'a {
        self.vms.iter().filter(move |vm| vm.host == host)
    }

    fn node_usage(&self, host: &HostDescription) -> NodeUsage {
        let mut usage = NodeUsage::new(&host.name, host.cpus, host.memory);
        let mut memory_load = 0;
        let mut cpu_load = 0.;
        for vm in self.resident_vms(&host.name) {
            let vm_usage = vm.usage();
            usage.memory_allocated += vm_usage.memory_allocated;
            usage.cpu_allocated += vm_usage.cpu_allocated;
            memory_load += vm_usage.memory_load;
            cpu_load += vm_usage.cpu_load;
            usage.vms.push(vm.name.clone());
        }
        usage.memory_load = host.memory_load.unwrap_or(memory_load);
        usage.cpu_load = host.cpu_load.unwrap_or(cpu_load);

        usage.thresholds = LoadThresholds {
            memory: host.memory_load_threshold.unwrap_or(self.config.memory_load_threshold),
            cpu: host.cpu_load_threshold.unwrap_or(self.config.cpu_load_threshold),
        };
        let names: BTreeSet<&String> = host.gmetrics.keys().chain(self.config.gmetric_thresholds.keys()).collect();
        for name in names {
            usage.gmetrics.insert(
                name.clone(),
                GMetric {
                    load: host.gmetrics.get(name).copied(),
                    threshold: self.config.gmetric_thresholds.get(name).copied(),
                },
            );
        }
        usage.power_state = host.power;
        usage
    }

    fn allows_migration(&self, host: &HostDescription, usage: &NodeUsage) -> bool {
        if host.hypervisor.is_none() {
            debug!("host '{}' does not allow migration (no hypervisor)", host.name);
            return false;
        }
        if !host.allow_migrations {
            debug!("host '{}' does not allow migration (disabled)", host.name);
            return false;
        }
        if !self.config.migrate_to_zero_load_nodes && (usage.cpu_load == 0. || usage.memory_load == 0) {
            debug!("host '{}' does not allow migration (zero load)", host.name);
            return false;
        }
        true
    }
}

impl ClusterServices for ClusterDescription {
    fn current_time(&self) -> f64 {
        self.time
    }

    fn feasibility_horizon(&self) -> f64 {
        self.config.feasibility_horizon
    }

    fn compute_usage_snapshot(&self) -> Result<UsageLedger, String> {
        let mut ledger = UsageLedger::new();
        let vms: Vec<VmUsage> = self.vms.iter().map(|vm| vm.usage()).collect();

        for host in self.hosts.iter() {
            let usage = self.node_usage(host);
            if self.allows_migration(host, &usage) {
                ledger.add_node(usage);
            }
        }

        for vm in vms {
            if let Some(destination) = vm.migrating_to.as_deref() {
                if self.host(destination).is_none() {
                    return Err(format!("vm '{}' is migrating to unknown host '{}'", vm.name, destination));
                }
                if let Some(source) = ledger.node_mut(&vm.node) {
                    source.subtract_vm(&vm);
                }
                if let Some(destination) = ledger.node_mut(destination) {
                    destination.add_vm(&vm);
                }
            }
            ledger.add_vm(vm);
        }
        Ok(ledger)
    }

    fn build_representative_job(&self, vm: &str) -> Result<RepresentativeJob, String> {
        let vm = self.vm(vm).ok_or_else(|| format!("unknown vm '{}'", vm))?;
        Ok(RepresentativeJob {
            vm: vm.name.clone(),
            cpu: vm.cpus,
            memory: vm.memory,
            task_count: 1,
            walltime: self.config.feasibility_horizon,
            features: vm.features.clone(),
        })
    }

    fn check_feasibility_window(
        &self,
        job: &RepresentativeJob,
        node: &str,
        start: f64,
        horizon: f64,
    ) -> Result<FeasibilityWindow, String> {
        let host = self.host(node).ok_or_else(|| format!("unknown host '{}'", node))?;
        let cpus = job.cpu as u64 * job.task_count as u64;
        let memory = job.memory * job.task_count as u64;
        if cpus > host.cpus as u64 || memory > host.memory {
            return Err(format!(
                "host '{}' cannot fit job of vm '{}' ({} cpus, {} MB)",
                node, job.vm, cpus, memory
            ));
        }
        let end = start + horizon.min(job.walltime);
        let mut window = FeasibilityWindow {
            earliest_start: start,
            blocking_reservation: None,
        };
        for reservation in host.reservations.iter() {
            if reservation.start < end && reservation.end > start {
                if window.blocking_reservation.is_none() {
                    window.blocking_reservation = Some(reservation.name.clone());
                }
                window.earliest_start = window.earliest_start.max(reservation.end);
            }
        }
        Ok(window)
    }

    fn is_valid_migration_destination(&self, vm: &str, node: &str) -> bool {
        let (vm, host) = match (self.vm(vm), self.host(node)) {
            (Some(vm), Some(host)) => (vm, host),
            _ => return false,
        };
        let hypervisor_matches = match (&vm.hypervisor, &host.hypervisor) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(required), Some(provided)) => required == provided,
        };
        let vlan_matches = match &vm.vlan {
            Some(vlan) => host.vlans.contains(vlan),
            None => true,
        };
        hypervisor_matches && vlan_matches
    }

    fn check_feature_compatibility(&self, job: &RepresentativeJob, node: &str) -> bool {
        match self.host(node) {
            Some(host) => job.features.is_subset(&host.features),
            None => false,
        }
    }

    fn power_state(&self, node: &str) -> PowerState {
        self.host(node).map(|host| host.power).unwrap_or(PowerState::Unknown)
    }
}
