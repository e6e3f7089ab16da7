// ABOUTME: Live connector - opens the MySQL and PostgreSQL connections for one pass
// ABOUTME: A session owns both connections and closes them together

use async_trait::async_trait;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::mysql::{self, LogQueries, MySqlStore};
use crate::postgres::{self, DestinationQueries, PgStore};
use crate::sync::{
    CentralLogStore, ChangeLogStore, Connector, DestinationStore, Session, SourceStore,
};

pub struct LiveConnector {
    source_url: String,
    destination_url: String,
    log_queries: LogQueries,
    destination_queries: DestinationQueries,
}

impl LiveConnector {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            source_url: config.source_url.clone(),
            destination_url: config.destination_url.clone(),
            log_queries: LogQueries::new(
                &config.log_table,
                &config.source_table,
                &config.columns,
                &config.log_columns,
            ),
            destination_queries: DestinationQueries::new(
                &config.destination_table,
                &config.central_log_table,
                &config.columns,
                &config.log_columns,
            ),
        }
    }

    /// Open only the MySQL side, for read-only inspection of the change log.
    pub async fn connect_log(&self) -> Result<MySqlStore, SyncError> {
        let conn = mysql::connect(&self.source_url)
            .await
            .map_err(|e| SyncError::connection("source MySQL", e))?;
        Ok(MySqlStore::new(conn, self.log_queries.clone()))
    }
}

#[async_trait]
impl Connector for LiveConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, SyncError> {
        let mysql = self.connect_log().await?;

        let pg = match postgres::connect(&self.destination_url).await {
            Ok(pg) => pg,
            Err(e) => {
                if let Err(close_err) = mysql.close().await {
                    tracing::warn!("{:#}", close_err);
                }
                return Err(SyncError::connection("destination PostgreSQL", e));
            }
        };

        Ok(Box::new(LiveSession {
            mysql,
            postgres: PgStore::new(pg, self.destination_queries.clone()),
        }))
    }
}

struct LiveSession {
    mysql: MySqlStore,
    postgres: PgStore,
}

#[async_trait]
impl Session for LiveSession {
    fn log(&self) -> &dyn ChangeLogStore {
        &self.mysql
    }

    fn source(&self) -> &dyn SourceStore {
        &self.mysql
    }

    fn destination(&self) -> &dyn DestinationStore {
        &self.postgres
    }

    fn central(&self) -> &dyn CentralLogStore {
        &self.postgres
    }

    async fn close(self: Box<Self>) {
        let LiveSession { mysql, postgres } = *self;
        if let Err(e) = mysql.close().await {
            tracing::warn!("{:#}", e);
        }
        postgres.close().await;
    }
}
