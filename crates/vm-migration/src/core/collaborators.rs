//! Services of the workload manager used by migration planning.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::ledger::UsageLedger;
use crate::core::usage::PowerState;

/// Synthetic job with the resource demand of a VM, used to check scheduling feasibility on candidate nodes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RepresentativeJob {
    /// Name of the VM the job stands for.
    pub vm: String,
    /// CPUs requested by each task.
    pub cpu: u32,
    /// Memory in MB requested by each task.
    pub memory: u64,
    pub task_count: u32,
    /// Requested wall time in seconds.
    pub walltime: f64,
    /// Node features required by the VM.
    pub features: BTreeSet<String>,
}

/// Result of the feasibility window check of a job on a node.
#[derive(Clone, Debug, PartialEq)]
pub struct FeasibilityWindow {
    /// Earliest time the job can start on the node.
    pub earliest_start: f64,
    /// Reservation that prevents the job from starting right now, if any.
    pub blocking_reservation: Option<String>,
}

/// Boundary between migration planning and the rest of the workload manager.
///
/// Implementations provide usage snapshots, representative jobs and the feasibility, compatibility and power checks.
/// Migration planning itself never modifies cluster state through this trait.
pub trait ClusterServices {
    /// Returns the current time in seconds.
    fn current_time(&self) -> f64;

    /// Returns the length of the window in seconds the migrated VM must fit into on a destination.
    fn feasibility_horizon(&self) -> f64;

    /// Computes fresh usages of all candidate nodes and VMs.
    fn compute_usage_snapshot(&self) -> Result<UsageLedger, String>;

    /// Creates a job with the resource demand and required features of the VM.
    fn build_representative_job(&self, vm: &str) -> Result<RepresentativeJob, String>;

    /// Releases the job created by [`build_representative_job`](Self::build_representative_job).
    fn release_representative_job(&self, _job: RepresentativeJob) {}

    /// Determines when the job can start on the node within `[start, start + horizon)`.
    ///
    /// Fails if the node cannot fit the job at all.
    fn check_feasibility_window(
        &self,
        job: &RepresentativeJob,
        node: &str,
        start: f64,
        horizon: f64,
    ) -> Result<FeasibilityWindow, String>;

    /// Returns true if the node can host the VM (hypervisor type, network membership).
    fn is_valid_migration_destination(&self, vm: &str, node: &str) -> bool;

    /// Returns true if the node provides the features required by the job.
    fn check_feature_compatibility(&self, job: &RepresentativeJob, node: &str) -> bool;

    fn power_state(&self, node: &str) -> PowerState;
}

/// Holds the representative job and releases it when dropped.
pub(crate) struct JobGuard<'a, S: ClusterServices + ?Sized> {
    services: &'a S,
    job: RepresentativeJob,
}

impl<'a, S: ClusterServices + ?Sized> JobGuard<'a, S> {
    pub fn new(services: &'a S, job: RepresentativeJob) -> Self {
        Self { services, job }
    }

    pub fn job(&self) -> &RepresentativeJob {
        &self.job
    }
}

impl<'a, S: ClusterServices + ?Sized> Drop for JobGuard<'a, S> {
    fn drop(&mut self) {
        self.services.release_representative_job(std::mem::take(&mut self.job));
    }
}
