use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

/// Create a PostgreSQL connection pool pinned to `schema`.
///
/// Every physical connection handed out by the pool (including the ones
/// `sqlx::migrate!` borrows) runs `CREATE SCHEMA IF NOT EXISTS` and `SET
/// search_path` on connect, so hand-written migrations and runtime queries
/// can both use unqualified table names while `chainidx-store`'s `Schema`
/// wrapper still fully qualifies every identifier it emits as defense in
/// depth. `max_connections` controls the pool ceiling (`AppConfig::db_max_connections`,
/// default 20).
pub async fn create_pool(database_url: &str, schema: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let options: PgConnectOptions = database_url.parse()?;
    let schema_owned = schema.to_string();

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .after_connect(move |conn, _meta| {
            let schema = schema_owned.clone();
            Box::pin(async move {
                sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""))
                    .execute(&mut *conn)
                    .await?;
                sqlx::query(&format!("SET search_path TO \"{schema}\", public"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect_with(options)
        .await?;

    tracing::info!(max_connections, schema, "Connected to PostgreSQL");
    Ok(pool)
}
