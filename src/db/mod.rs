mod schema;

use std::sync::Arc;

use tokio_postgres::{Client, NoTls};

use crate::core::AppError;

pub use schema::ensure_schema;

/// Thin owner of the `tokio-postgres` client. Construct once per process,
/// share by reference. The background connection driver is spawned and its
/// errors are only logged: a dead connection surfaces through the next
/// query's error, not a panic.
pub struct Db {
    client: Arc<Client>,
}

impl Db {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection driver exited");
            }
        });

        client
            .batch_execute(
                "\
                SET TIME ZONE 'UTC';
                SET client_encoding = 'UTF8';
                ",
            )
            .await?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn health(&self) -> Result<bool, AppError> {
        let row = self.client.query_one("SELECT 1", &[]).await?;
        let v: i32 = row.get(0);
        Ok(v == 1)
    }
}
