//! `influxdb` 1.x store, over its http api.
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, Response, StatusCode};

use crate::config::StoreConfig;
use crate::db::store::{SeriesStore, SeriesWrite};
use crate::error::StoreError;

#[derive(Clone)]
pub struct InfluxStore {
    client: Client,
    base_url: String,
    database: String,
    username: String,
    password: String,
}

impl InfluxStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| StoreError::Unavailable {
                endpoint: config.base_url(),
                reason: format!("build http client failed: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url(),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn unavailable(&self, err: reqwest::Error) -> StoreError {
        StoreError::Unavailable {
            endpoint: self.base_url.clone(),
            reason: err.to_string(),
        }
    }

    /// 2xx is success. 5xx, 401 and 403 mean the store will not take any write
    /// from us, anything else is a refusal of this particular request.
    async fn check_response(&self, resp: Response) -> Result<(), StoreError> {
        let status = resp.status();

        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        classify_status(&self.base_url, status, body.trim())
    }
}

fn classify_status(endpoint: &str, status: StatusCode, body: &str) -> Result<(), StoreError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error()
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
    {
        Err(StoreError::Unavailable {
            endpoint: endpoint.to_string(),
            reason: format!("status: {}, body: {}", status, body),
        })
    } else {
        Err(StoreError::Rejected(format!(
            "status: {}, body: {}",
            status, body
        )))
    }
}

#[async_trait]
impl SeriesStore for InfluxStore {
    fn endpoint(&self) -> String {
        self.base_url.clone()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let resp = self
            .client
            .get(self.url("ping"))
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        self.check_response(resp).await
    }

    async fn ensure_database(&self) -> Result<(), StoreError> {
        let query = format!(
            "CREATE DATABASE \"{}\"",
            self.database.replace('"', "\\\"")
        );

        let resp = self
            .client
            .post(self.url("query"))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("q", query.as_str())])
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        self.check_response(resp).await?;

        info!(
            "database ready, endpoint: {}, database: {}",
            self.base_url, self.database
        );

        Ok(())
    }

    async fn write_series(&self, series: &SeriesWrite<'_>) -> Result<(), StoreError> {
        let body = series.to_line_protocol()?;

        if body.is_empty() {
            return Ok(());
        }

        let resp = self
            .client
            .post(self.url("write"))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("db", self.database.as_str()), ("precision", "ns")])
            .body(body)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        self.check_response(resp).await?;

        debug!(
            "write series done, partition: {}, points: {}",
            series.key(),
            series.points().len()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(classify_status("http://db:8086", StatusCode::NO_CONTENT, "").is_ok());

        assert!(matches!(
            classify_status("http://db:8086", StatusCode::SERVICE_UNAVAILABLE, "overloaded"),
            Err(StoreError::Unavailable { .. })
        ));

        match classify_status(
            "http://db:8086",
            StatusCode::BAD_REQUEST,
            "field type conflict",
        ) {
            Err(StoreError::Rejected(reason)) => assert!(reason.contains("field type conflict")),
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(matches!(
            classify_status("http://db:8086", StatusCode::NOT_FOUND, "database not found"),
            Err(StoreError::Rejected(_))
        ));

        // Bad credentials fail every partition alike.
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            assert!(matches!(
                classify_status("http://db:8086", status, "authorization failed"),
                Err(StoreError::Unavailable { .. })
            ));
        }
    }

    #[test]
    fn test_new_influx_store() {
        let config = StoreConfig::default();
        let store = InfluxStore::new(&config).unwrap();

        assert_eq!(store.endpoint(), "http://influxdb:8086");
        assert_eq!(store.database(), "raw_sensor_data");
        assert_eq!(store.url("write"), "http://influxdb:8086/write");
    }

    #[tokio::test]
    async fn test_unreachable_store() {
        let config = StoreConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            timeout_secs: 2,
            ..StoreConfig::default()
        };

        let store = InfluxStore::new(&config).unwrap();

        assert!(matches!(
            store.ping().await,
            Err(StoreError::Unavailable { .. })
        ));
    }
}
