//! Custom Resource Definitions (CRDs) for limitador-operator.
//!
//! - `Limitador`: one rate-limiting service instance and its limits

mod limitador;

pub use limitador::*;
