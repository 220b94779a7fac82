pub mod cluster_description;
