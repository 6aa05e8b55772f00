//! Query layer: FHIR search bundles and the paginated, retrying executor.

pub mod bundle;
pub mod executor;

pub use bundle::Bundle;
pub use executor::{ExecutorOptions, QueryExecutor};
