//! In-memory collaborators for driver and pool tests.

use crate::error::{BenchError, BenchResult, QueryPhase};
use crate::pool::Connector;
use crate::workload::Workload;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, PartialEq, Eq)]
pub struct MockConn {
    pub id: usize,
}

#[derive(Default)]
struct ConnectorState {
    attempts: AtomicUsize,
    open: AtomicUsize,
    closed: AtomicUsize,
    close_calls: AtomicUsize,
    fail_first: usize,
    refuse_after: Option<usize>,
    close_fails: bool,
    shut_down: AtomicBool,
}

/// Connector whose attempt outcomes are scripted. Connection ids are the
/// zero-based attempt index that produced them.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<ConnectorState>,
}

impl MockConnector {
    pub fn healthy() -> Self {
        Self::default()
    }

    /// The first `n` attempts fail, every later one succeeds.
    pub fn failing_first(n: usize) -> Self {
        Self {
            state: Arc::new(ConnectorState {
                fail_first: n,
                ..Default::default()
            }),
        }
    }

    /// The first `n` attempts succeed, every later one fails.
    pub fn refusing_after(n: usize) -> Self {
        Self {
            state: Arc::new(ConnectorState {
                refuse_after: Some(n),
                ..Default::default()
            }),
        }
    }

    pub fn with_close_failures(self) -> Self {
        let state = Arc::try_unwrap(self.state).unwrap_or_default();
        Self {
            state: Arc::new(ConnectorState {
                close_fails: true,
                ..state
            }),
        }
    }

    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn open(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Conn = MockConn;

    async fn connect(&self) -> Result<MockConn, sqlx::Error> {
        let attempt = self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self.state.refuse_after.is_some_and(|n| attempt >= n);
        if attempt < self.state.fail_first || refused {
            return Err(sqlx::Error::PoolTimedOut);
        }
        self.state.open.fetch_add(1, Ordering::SeqCst);
        Ok(MockConn { id: attempt })
    }

    async fn close(&self, _conn: MockConn) -> Result<(), sqlx::Error> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.close_fails {
            return Err(sqlx::Error::PoolClosed);
        }
        self.state.open.fetch_sub(1, Ordering::SeqCst);
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) {
        self.state.shut_down.store(true, Ordering::SeqCst);
    }
}

/// One recorded unit execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub worker: usize,
    pub conn: usize,
}

/// Workload that sleeps for `hold` and reports `10ms * (worker + 1)`.
///
/// Worker numbers listed in `failing` fail with an insert error once the
/// first `armed_after` calls (the warm-up) have gone through.
pub struct MockWorkload {
    num_tables: usize,
    hold: Duration,
    failing: HashSet<usize>,
    armed_after: usize,
    panicking: HashSet<usize>,
    fail_create: bool,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    pub log: Mutex<Vec<Call>>,
    pub created: Mutex<Vec<usize>>,
    pub dropped: Mutex<Vec<usize>>,
}

impl MockWorkload {
    pub fn new(num_tables: usize, hold: Duration) -> Self {
        Self {
            num_tables,
            hold,
            failing: HashSet::new(),
            armed_after: 0,
            panicking: HashSet::new(),
            fail_create: false,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            dropped: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_workers(mut self, armed_after: usize, workers: &[usize]) -> Self {
        self.armed_after = armed_after;
        self.failing = workers.iter().copied().collect();
        self
    }

    pub fn panicking_workers(mut self, armed_after: usize, workers: &[usize]) -> Self {
        self.armed_after = armed_after;
        self.panicking = workers.iter().copied().collect();
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn sample_for(worker: usize) -> Duration {
        Duration::from_millis(10 * (worker as u64 + 1))
    }

    /// Highest concurrency seen since the last call, then reset.
    pub fn take_peak(&self) -> usize {
        self.peak.swap(0, Ordering::SeqCst)
    }
}

#[async_trait]
impl Workload<MockConn> for MockWorkload {
    fn num_tables(&self) -> usize {
        self.num_tables
    }

    async fn create_table(&self, _conn: &mut MockConn, table: usize) -> BenchResult<()> {
        if self.fail_create && table > 0 {
            return Err(BenchError::Setup(format!("Error creating table users_{table}")));
        }
        self.created.lock().push(table);
        Ok(())
    }

    async fn drop_table(&self, _conn: &mut MockConn, table: usize) -> BenchResult<()> {
        self.dropped.lock().push(table);
        Ok(())
    }

    async fn execute(&self, conn: &mut MockConn, worker_num: usize) -> BenchResult<Duration> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(Call {
            worker: worker_num,
            conn: conn.id,
        });

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        let armed = call >= self.armed_after;
        if armed && self.panicking.contains(&worker_num) {
            panic!("worker {worker_num} blew up");
        }
        if armed && self.failing.contains(&worker_num) {
            return Err(BenchError::query(QueryPhase::Insert, sqlx::Error::PoolTimedOut));
        }
        Ok(Self::sample_for(worker_num))
    }
}
