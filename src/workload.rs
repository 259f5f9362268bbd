//! The measured unit of database work and the scratch tables it runs on.

use crate::error::{BenchError, BenchResult, QueryPhase, TxPhase};
use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use sqlx::Connection;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Rows inserted, read back and deleted by one unit.
pub const ROWS_PER_UNIT: usize = 10;

/// Name of the scratch table with the given index.
pub fn table_name(index: usize) -> String {
    format!("users_{index}")
}

/// A unit of work the ramp driver can time, plus its schema lifecycle.
#[async_trait]
pub trait Workload<C: Send>: Send + Sync + 'static {
    /// Number of scratch tables units are spread over.
    fn num_tables(&self) -> usize;

    async fn create_table(&self, conn: &mut C, table: usize) -> BenchResult<()>;

    async fn drop_table(&self, conn: &mut C, table: usize) -> BenchResult<()>;

    /// Run one unit and return how long it took. A failed unit has no
    /// duration.
    async fn execute(&self, conn: &mut C, worker_num: usize) -> BenchResult<Duration>;
}

/// Insert, point-read and delete [`ROWS_PER_UNIT`] rows inside one
/// transaction.
///
/// On failure the sqlx `Transaction` guard is dropped without commit and
/// sqlx issues the `ROLLBACK` before the connection is used again; no
/// explicit rollback is sent from here.
#[derive(Debug, Clone)]
pub struct TransactionalWorkload {
    num_tables: usize,
}

impl TransactionalWorkload {
    pub fn new(num_tables: usize) -> Self {
        Self {
            num_tables: num_tables.max(1),
        }
    }

    /// Table a given worker writes to.
    pub fn table_for(&self, worker_num: usize) -> usize {
        worker_num % self.num_tables
    }
}

#[async_trait]
impl Workload<PgConnection> for TransactionalWorkload {
    fn num_tables(&self) -> usize {
        self.num_tables
    }

    async fn create_table(&self, conn: &mut PgConnection, table: usize) -> BenchResult<()> {
        let name = table_name(table);
        let sql = format!(r#"CREATE TABLE "{name}" (id BIGSERIAL, name VARCHAR(50))"#);
        sqlx::query(&sql)
            .execute(&mut *conn)
            .await
            .map_err(|e| BenchError::Setup(format!("Error creating table {name}: {e}")))?;
        Ok(())
    }

    async fn drop_table(&self, conn: &mut PgConnection, table: usize) -> BenchResult<()> {
        let name = table_name(table);
        let sql = format!(r#"DROP TABLE "{name}""#);
        sqlx::query(&sql)
            .execute(&mut *conn)
            .await
            .map_err(|e| BenchError::Cleanup(format!("Error dropping table {name}: {e}")))?;
        Ok(())
    }

    async fn execute(&self, conn: &mut PgConnection, worker_num: usize) -> BenchResult<Duration> {
        let table = table_name(self.table_for(worker_num));
        let insert = format!(r#"INSERT INTO "{table}" (name) VALUES ($1) RETURNING id"#);
        let select = format!(r#"SELECT id, name FROM "{table}" WHERE id = $1"#);
        let delete = format!(r#"DELETE FROM "{table}" WHERE id = $1"#);

        let start = Instant::now();

        let mut tx = conn
            .begin()
            .await
            .map_err(|e| BenchError::transaction(TxPhase::Begin, e))?;

        let mut ids = Vec::with_capacity(ROWS_PER_UNIT);
        for _ in 0..ROWS_PER_UNIT {
            let name = Uuid::new_v4().to_string();
            let id: i64 = sqlx::query_scalar(&insert)
                .bind(name)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| BenchError::query(QueryPhase::Insert, e))?;
            ids.push(id);
        }

        for id in &ids {
            let _row: (i64, Option<String>) = sqlx::query_as(&select)
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| BenchError::query(QueryPhase::Select, e))?;
        }

        for id in &ids {
            sqlx::query(&delete)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| BenchError::query(QueryPhase::Delete, e))?;
        }

        tx.commit()
            .await
            .map_err(|e| BenchError::transaction(TxPhase::Commit, e))?;

        Ok(start.elapsed())
    }
}
