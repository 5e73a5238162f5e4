//! Resource generation module.
//!
//! Contains the builders for the child objects owned by a Limitador and
//! the storage backend resolution feeding the Deployment.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | Service | gRPC and HTTP endpoint of the rate limit service |
//! | Deployment | Limitador server pods |
//! | ConfigMap | Limits file read by the server |
//! | PersistentVolumeClaim | Counters storage for the disk backend |
//! | PodDisruptionBudget | Optional disruption policy |

pub mod common;
pub mod configmap;
pub mod deployment;
pub mod pdb;
pub mod pvc;
pub mod services;
pub mod storage;

// Re-export commonly used items from common
pub use common::{owner_reference, standard_labels};
pub use storage::DeploymentStorageOptions;
