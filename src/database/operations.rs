/// Database operations for storing and retrieving sensor readings
///
/// Every sensor owns a table `"<module>"."<sensor>"` with the layout
/// `(id serial primary key, timestamp timestamptz, value numeric)`.
/// `value` is exchanged as float8 and cast on the server side.
use log::{debug, error, info};
use time::OffsetDateTime;
use tokio_postgres::Row;

use crate::cache::Registry;
use crate::database::connection::Database;
use crate::error::DbError;
use crate::models::{Reading, SensorAddress};
use crate::utils::quote_identifier;

/// Row selection for [`Database::query_readings`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadingQuery {
    /// Newest `limit` rows, newest first
    MostRecent { limit: i64 },
    /// Rows strictly between the two instants, at most `limit`
    Between {
        lower: OffsetDateTime,
        upper: OffsetDateTime,
        limit: i64,
    },
}

fn table_name(address: &SensorAddress) -> String {
    format!(
        "{}.{}",
        quote_identifier(&address.schema),
        quote_identifier(&address.table)
    )
}

fn reading_from_row(row: &Row) -> Result<Reading, tokio_postgres::Error> {
    Ok(Reading {
        id: row.try_get("id")?,
        timestamp: row.try_get("timestamp")?,
        value: row.try_get("value")?,
    })
}

impl Database {
    /// Insert one timestamped reading. Each insert commits on its own.
    pub async fn append_value(&self, address: &SensorAddress, value: f64) -> Result<u64, DbError> {
        let statement = format!(
            "INSERT INTO {} (timestamp, value) VALUES (current_timestamp, $1::float8)",
            table_name(address)
        );

        self.client
            .execute(statement.as_str(), &[&value])
            .await
            .map_err(|source| DbError::Query {
                target: address.to_string(),
                source,
            })
    }

    pub async fn query_most_recent(
        &self,
        address: &SensorAddress,
        limit: i64,
    ) -> Result<Vec<Reading>, DbError> {
        self.query_readings(address, ReadingQuery::MostRecent { limit })
            .await
    }

    pub async fn query_between(
        &self,
        address: &SensorAddress,
        lower: OffsetDateTime,
        upper: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<Reading>, DbError> {
        self.query_readings(address, ReadingQuery::Between { lower, upper, limit })
            .await
    }

    /// Run a reading query. On failure the connection is rolled back so the
    /// next statement starts clean, and the error is returned.
    pub async fn query_readings(
        &self,
        address: &SensorAddress,
        query: ReadingQuery,
    ) -> Result<Vec<Reading>, DbError> {
        let table = table_name(address);

        let result = match query {
            ReadingQuery::MostRecent { limit } => {
                let statement = format!(
                    "SELECT id, timestamp, value::float8 AS value FROM {} ORDER BY id DESC LIMIT $1",
                    table
                );
                self.client.query(statement.as_str(), &[&limit]).await
            }
            ReadingQuery::Between {
                lower,
                upper,
                limit,
            } => {
                let statement = format!(
                    "SELECT id, timestamp, value::float8 AS value FROM {} \
                     WHERE timestamp > $1 AND timestamp < $2 ORDER BY id LIMIT $3",
                    table
                );
                self.client
                    .query(statement.as_str(), &[&lower, &upper, &limit])
                    .await
            }
        };

        let readings: Result<Vec<Reading>, _> = result.and_then(|rows| rows.iter().map(reading_from_row).collect());

        match readings {
            Ok(readings) => {
                debug!("Fetched {} rows from {}", readings.len(), address);
                Ok(readings)
            }
            Err(source) => {
                self.rollback().await;
                Err(DbError::Query {
                    target: address.to_string(),
                    source,
                })
            }
        }
    }

    /// Like [`Database::query_readings`] but logs failures and returns no
    /// rows, so "empty" and "failed" look the same to the caller
    pub async fn query_or_empty(&self, address: &SensorAddress, query: ReadingQuery) -> Vec<Reading> {
        match self.query_readings(address, query).await {
            Ok(readings) => readings,
            Err(e) => {
                error!("{}", e);
                Vec::new()
            }
        }
    }

    async fn rollback(&self) {
        if let Err(e) = self.client.batch_execute("ROLLBACK").await {
            debug!("Rollback failed: {}", e);
        }
    }

    /// Create the schema of every module and the table of every sensor
    pub async fn ensure_tables(&self, registry: &Registry) -> Result<(), DbError> {
        for module in registry.modules() {
            let statement = format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                quote_identifier(&module.tag)
            );
            self.client
                .batch_execute(&statement)
                .await
                .map_err(|source| DbError::Query {
                    target: module.tag.clone(),
                    source,
                })?;

            for sensor in &module.sensors {
                let address = sensor.address();
                let statement = format!(
                    "CREATE TABLE IF NOT EXISTS {} (\
                     id serial PRIMARY KEY, \
                     timestamp timestamptz NOT NULL DEFAULT current_timestamp, \
                     value numeric)",
                    table_name(&address)
                );
                self.client
                    .batch_execute(&statement)
                    .await
                    .map_err(|source| DbError::Query {
                        target: address.to_string(),
                        source,
                    })?;
            }
        }

        info!("Ensured tables for {} sensors", registry.sensor_count());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_quotes_identifiers() {
        let address = SensorAddress::new("main_battery", "voltage");
        assert_eq!(table_name(&address), "\"main_battery\".\"voltage\"");

        let hostile = SensorAddress::new("a\"b", "c; DROP TABLE x");
        assert_eq!(table_name(&hostile), "\"a\"\"b\".\"c; DROP TABLE x\"");
    }
}
