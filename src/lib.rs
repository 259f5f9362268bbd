//! # connramp
//!
//! > **How does transaction latency degrade as you hold more connections?**
//!
//! connramp opens a growing number of dedicated PostgreSQL connections and,
//! at each level `n = 1..=num_loops`, runs one short transaction on every
//! one of them at the same time. Each step produces one CSV row of
//! `connections,p50,p75,p95` (seconds).
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use connramp::prelude::*;
//!
//! let config = BenchConfig {
//!     num_loops: 100,
//!     ..Default::default()
//! };
//! let rows = connramp::run(&config, Reporter::stdio(true)).await?;
//! ```
//!
//! ## Workload
//!
//! | Phase  | Statements                                   |
//! |--------|----------------------------------------------|
//! | begin  | `BEGIN`                                      |
//! | insert | 10 × `INSERT ... RETURNING id`               |
//! | select | 10 × `SELECT ... WHERE id = $1`              |
//! | delete | 10 × `DELETE ... WHERE id = $1`              |
//! | commit | `COMMIT`                                     |

pub mod config;
pub mod error;
pub mod estimator;
pub mod pool;
pub mod ramp;
pub mod report;
pub mod workload;

#[cfg(test)]
pub(crate) mod testing;

use std::io::Write;
use std::sync::Arc;

pub mod prelude {
    pub use crate::config::BenchConfig;
    pub use crate::error::*;
    pub use crate::estimator::{Metrics, PercentileEstimator};
    pub use crate::pool::{Backoff, ConnectionManager, Connector, PgConnector};
    pub use crate::ramp::{RampDriver, StepRow};
    pub use crate::report::Reporter;
    pub use crate::workload::{TransactionalWorkload, Workload};
}

use prelude::*;

/// Run the full benchmark against PostgreSQL.
///
/// Tables and connections are cleaned up before this returns, on success
/// and on error alike.
pub async fn run<H: Write, C: Write>(
    config: &BenchConfig,
    reporter: Reporter<H, C>,
) -> BenchResult<Vec<StepRow>> {
    config.validate()?;

    let connector = PgConnector::new(config)?;
    let manager = ConnectionManager::new(connector, config);
    let workload = Arc::new(TransactionalWorkload::new(config.num_tables));

    let mut driver = RampDriver::new(config, manager, workload, reporter);
    driver.run().await
}
