use sqlx::PgPool;

/// Executes query objects against the shared Postgres pool.
///
/// Each query is a plain struct with a `kanau::processor::Processor` impl on
/// this type, so call sites read as `db.process(Query { .. })`.
#[derive(Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Close every connection in the pool. Waits for checked-out connections
    /// to be returned first.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}
