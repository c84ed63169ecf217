//! Database module
//!
//! Connectivity and schema checks for PostgreSQL stores.
//! Tables are created by the SQL files in migrations/.

use sqlx::PgPool;

use crate::store::StoreRole;

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}

/// Check if a table exists in the current schema
pub async fn table_exists(pool: &PgPool, table: &str) -> Result<bool, sqlx::Error> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_name = $1
        )
        "#,
    )
    .bind(table)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

/// Check that the table a store needs for `role` exists
pub async fn check_schema(pool: &PgPool, role: StoreRole) -> Result<bool, sqlx::Error> {
    let table = role.table();

    if !table_exists(pool, table).await? {
        tracing::error!("Required table '{}' does not exist", table);
        return Ok(false);
    }

    Ok(true)
}
