use sqlx::{postgres::PgPoolOptions, PgPool};

/// Connects to the catalog database and applies pending migrations
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Catalog migrations applied");

    Ok(pool)
}
