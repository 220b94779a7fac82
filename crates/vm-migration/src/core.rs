pub mod collaborators;
pub mod config;
pub mod destination;
pub mod error;
pub mod ledger;
pub mod migration_policies;
pub mod migration_policy;
pub mod ordering;
pub mod overcommit;
pub mod planner;
pub mod usage;
