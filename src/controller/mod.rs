//! Controller module for limitador-operator.
//!
//! Contains the reconciliation pass, the mutate-compare-apply engine and
//! its kind-specific mutators, status management, the 0.7.0 upgrade
//! migration and error handling.

pub mod apply;
pub mod context;
pub mod error;
pub mod mutators;
pub mod reconciler;
pub mod status;
pub mod upgrades;
