//! The connection-ramp driver.
//!
//! For every step `n` in `1..=num_loops` the driver replaces the connection
//! in slot `n - 1`, runs one workload unit on each of the slots `[0, n)`
//! concurrently, waits for all of them, and reports the step's latency
//! percentiles. Steps run strictly in ascending order:
//!
//! ```text
//! Idle -> Establishing(n) -> Running(n) -> Reporting(n) -> Establishing(n+1) ... -> Done
//! ```
//!
//! Workers never talk to each other. The step's [`PercentileEstimator`] is
//! the only state they share, and there is no timeout: a stalled unit
//! stalls the step.

use crate::config::BenchConfig;
use crate::error::{BenchError, BenchResult};
use crate::estimator::{Metrics, PercentileEstimator};
use crate::pool::{ConnectionManager, Connector};
use crate::report::Reporter;
use crate::workload::Workload;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One line of the experiment's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRow {
    /// Concurrent connections in this step.
    pub connections: usize,
    pub p50: Duration,
    pub p75: Duration,
    pub p95: Duration,
    /// Units that failed; they contribute no sample.
    pub errors: usize,
}

impl StepRow {
    fn from_metrics(connections: usize, metrics: &Metrics, errors: usize) -> Self {
        Self {
            connections,
            p50: metrics.p50,
            p75: metrics.p75,
            p95: metrics.p95,
            errors,
        }
    }

    /// `connections,p50,p75,p95` with percentiles in seconds.
    pub fn csv_line(&self) -> String {
        format!(
            "{},{},{},{}",
            self.connections,
            self.p50.as_secs_f64(),
            self.p75.as_secs_f64(),
            self.p95.as_secs_f64()
        )
    }
}

type WorkerOutcome<C> = (C, BenchResult<()>);

pub struct RampDriver<K: Connector, W, H, C> {
    manager: ConnectionManager<K>,
    workload: Arc<W>,
    reporter: Reporter<H, C>,
    num_loops: usize,
    slots: Vec<K::Conn>,
    tables_created: usize,
}

impl<K, W, H, C> RampDriver<K, W, H, C>
where
    K: Connector,
    W: Workload<K::Conn>,
    H: Write,
    C: Write,
{
    pub fn new(
        config: &BenchConfig,
        manager: ConnectionManager<K>,
        workload: Arc<W>,
        reporter: Reporter<H, C>,
    ) -> Self {
        Self {
            manager,
            workload,
            reporter,
            num_loops: config.num_loops,
            slots: Vec::with_capacity(config.num_loops),
            tables_created: 0,
        }
    }

    /// Number of slots currently holding a connection.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Run the whole experiment and always tear down afterwards, whether
    /// it finished or hit a fatal error.
    pub async fn run(&mut self) -> BenchResult<Vec<StepRow>> {
        let result = self.run_phases().await;
        if let Err(e) = &result {
            error!(error = %e, "benchmark aborted, cleaning up");
        }
        self.teardown().await;
        result
    }

    async fn run_phases(&mut self) -> BenchResult<Vec<StepRow>> {
        self.reporter.section("Establishing connections")?;
        self.establish().await?;

        self.reporter.section("Creating tables")?;
        self.create_tables().await?;

        self.reporter.section("Running warmup")?;
        self.warm_up().await?;

        self.ramp().await
    }

    /// Fill every slot with a fresh connection.
    pub async fn establish(&mut self) -> BenchResult<()> {
        let missing = self.num_loops.saturating_sub(self.slots.len());
        let conns = self.manager.acquire_many(missing).await?;
        self.slots.extend(conns);
        Ok(())
    }

    /// Create the scratch tables, spreading the DDL over the slots.
    pub async fn create_tables(&mut self) -> BenchResult<()> {
        if self.slots.is_empty() {
            return Err(BenchError::Setup("no connections to create tables on".into()));
        }
        for table in 0..self.workload.num_tables() {
            let slot = table % self.slots.len();
            self.workload
                .create_table(&mut self.slots[slot], table)
                .await?;
            self.tables_created = table + 1;
        }
        info!(tables = self.tables_created, "scratch tables created");
        Ok(())
    }

    /// One untimed unit per slot, one after another.
    pub async fn warm_up(&mut self) -> BenchResult<()> {
        for (slot, conn) in self.slots.iter_mut().enumerate() {
            self.workload.execute(conn, slot).await.map_err(|e| {
                BenchError::Setup(format!("Error during warmup on slot {slot}: {e}"))
            })?;
        }
        debug!(slots = self.slots.len(), "warmup finished");
        Ok(())
    }

    /// Steps `1..=num_loops`, preceded by the CSV header.
    pub async fn ramp(&mut self) -> BenchResult<Vec<StepRow>> {
        self.reporter.section("Running benchmark")?;
        self.reporter.csv_header()?;

        let mut rows = Vec::with_capacity(self.num_loops);
        for n in 1..=self.num_loops {
            rows.push(self.run_step(n).await?);
        }
        Ok(rows)
    }

    /// Run ramp step `n`: replace slot `n - 1`, fan out `n` units, join
    /// them all, report.
    pub async fn run_step(&mut self, n: usize) -> BenchResult<StepRow> {
        if n == 0 || n > self.slots.len() {
            return Err(BenchError::Setup(format!(
                "step {n} needs {n} connections, {} held",
                self.slots.len()
            )));
        }

        // Establishing(n)
        let stale = self.slots.remove(n - 1);
        self.manager.release(stale).await;
        let fresh = self.manager.acquire().await?;
        self.slots.insert(n - 1, fresh);

        // Running(n)
        let estimator = Arc::new(PercentileEstimator::new(n));
        let handles: Vec<JoinHandle<WorkerOutcome<K::Conn>>> = self
            .slots
            .drain(..n)
            .enumerate()
            .map(|(slot, conn)| {
                spawn_worker(
                    Arc::clone(&self.workload),
                    Arc::clone(&estimator),
                    slot,
                    conn,
                )
            })
            .collect();

        let mut returned = Vec::with_capacity(n);
        let mut failures = Vec::new();
        for (slot, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok((conn, outcome)) => {
                    returned.push(Some(conn));
                    if let Err(e) = outcome {
                        failures.push((slot, e));
                    }
                }
                Err(join_err) => {
                    returned.push(None);
                    failures.push((
                        slot,
                        BenchError::Worker {
                            slot,
                            message: join_err.to_string(),
                        },
                    ));
                }
            }
        }
        self.restore_slots(returned).await?;

        // Reporting(n)
        let metrics = estimator.compute();
        let row = StepRow::from_metrics(n, &metrics, failures.len());
        for (slot, e) in &failures {
            warn!(step = n, slot, error = %e, "workload unit failed");
            self.reporter.worker_failed(*slot, e)?;
        }
        self.reporter.step(&row, &metrics)?;
        Ok(row)
    }

    /// Put the participating connections back at the front of the slot
    /// list, replacing any that died with their worker.
    async fn restore_slots(&mut self, returned: Vec<Option<K::Conn>>) -> BenchResult<()> {
        let mut restored = Vec::with_capacity(returned.len());
        let mut fatal = None;
        for (slot, conn) in returned.into_iter().enumerate() {
            match conn {
                Some(conn) => restored.push(conn),
                None if fatal.is_none() => match self.manager.acquire().await {
                    Ok(conn) => {
                        debug!(slot, "replaced connection lost with its worker");
                        restored.push(conn);
                    }
                    Err(e) => fatal = Some(e),
                },
                None => {}
            }
        }
        self.slots.splice(0..0, restored);
        fatal.map_or(Ok(()), Err)
    }

    /// Drop the tables, close every connection and shut the connector down.
    /// Nothing here fails the run.
    pub async fn teardown(&mut self) {
        if self.tables_created > 0 {
            self.section_quiet("Dropping tables");
            if self.slots.is_empty() {
                error!(
                    tables = self.tables_created,
                    "no connection left to drop scratch tables"
                );
            } else {
                for table in 0..self.tables_created {
                    let slot = table % self.slots.len();
                    if let Err(e) = self.workload.drop_table(&mut self.slots[slot], table).await {
                        error!(error = %e, "Error dropping table");
                    }
                }
            }
            self.tables_created = 0;
        }

        if !self.slots.is_empty() {
            self.section_quiet("Closing connections");
            let slots = std::mem::take(&mut self.slots);
            self.manager.release_all(slots).await;
        }

        self.manager.shutdown().await;
    }

    fn section_quiet(&mut self, title: &str) {
        if let Err(e) = self.reporter.section(title) {
            warn!(error = %e, "failed to write progress output");
        }
    }

    pub fn into_reporter(self) -> Reporter<H, C> {
        self.reporter
    }
}

fn spawn_worker<C, W>(
    workload: Arc<W>,
    estimator: Arc<PercentileEstimator>,
    slot: usize,
    mut conn: C,
) -> JoinHandle<WorkerOutcome<C>>
where
    C: Send + 'static,
    W: Workload<C>,
{
    tokio::spawn(async move {
        let outcome = workload.execute(&mut conn, slot).await.map(|elapsed| {
            estimator.add(elapsed);
        });
        (conn, outcome)
    })
}
