// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB v2 HTTP client.

use super::{Database, DatabaseError};
use crate::config::InfluxDbConfig;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;

/// Writes Line Protocol batches to `/api/v2/write`.
pub struct InfluxDbClient {
    http: Client,
    write_url: Url,
    token: String,
}

impl InfluxDbClient {
    /// Build a client for the configured server, organization and bucket.
    pub fn new(config: &InfluxDbConfig) -> Result<Self, DatabaseError> {
        let write_url = Url::parse_with_params(
            &endpoint(&config.address, "api/v2/write"),
            &[
                ("org", config.organization.as_str()),
                ("bucket", config.bucket.as_str()),
                ("precision", "ns"),
            ],
        )
        .map_err(|_| DatabaseError::InvalidAddress(config.address.clone()))?;

        Ok(Self {
            http: http_client(config)?,
            write_url,
            token: config.token.clone(),
        })
    }

    /// Write URL, including query parameters.
    pub fn write_url(&self) -> &Url {
        &self.write_url
    }
}

impl Database for InfluxDbClient {
    async fn write(&self, lines: Vec<String>) -> Result<(), DatabaseError> {
        let response = self
            .http
            .post(self.write_url.clone())
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(lines.join("\n"))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DatabaseError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    async fn close(&self) {
        // reqwest pools connections per Client; dropping it releases them.
        tracing::debug!("InfluxDB client closing ({})", self.write_url.host_str().unwrap_or("?"));
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OnboardingRequest<'a> {
    username: &'a str,
    password: &'a str,
    org: &'a str,
    bucket: &'a str,
    retention_period_seconds: u64,
    token: &'a str,
}

/// Initialize a fresh InfluxDB instance: first user, organization, bucket
/// and the operator token from the configuration.
///
/// Fails when the instance is already set up.
pub async fn setup(config: &InfluxDbConfig) -> Result<(), DatabaseError> {
    let url = Url::parse(&endpoint(&config.address, "api/v2/setup"))
        .map_err(|_| DatabaseError::InvalidAddress(config.address.clone()))?;

    let request = OnboardingRequest {
        username: &config.setup.username,
        password: &config.setup.password,
        org: &config.organization,
        bucket: &config.bucket,
        retention_period_seconds: u64::from(config.setup.retention_period_hrs) * 3600,
        token: &config.token,
    };

    let response = http_client(config)?.post(url).json(&request).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DatabaseError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    tracing::info!(
        "InfluxDB initialized: org '{}', bucket '{}'",
        config.organization,
        config.bucket
    );
    Ok(())
}

/// Every request, including reading the response, is bounded by the write timeout.
fn http_client(config: &InfluxDbConfig) -> Result<Client, DatabaseError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.write_timeout_secs))
        .build()?;
    Ok(client)
}

fn endpoint(address: &str, path: &str) -> String {
    format!("{}/{}", address.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_url_carries_org_bucket_precision() {
        let config = InfluxDbConfig {
            address: "http://influx.local:8086/".into(),
            organization: "home lab".into(),
            bucket: "telemetry".into(),
            ..Default::default()
        };
        let client = InfluxDbClient::new(&config).expect("client");
        let url = client.write_url();

        assert_eq!(url.path(), "/api/v2/write");
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            query,
            vec![
                ("org".to_string(), "home lab".to_string()),
                ("bucket".to_string(), "telemetry".to_string()),
                ("precision".to_string(), "ns".to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_address_rejected() {
        let config = InfluxDbConfig {
            address: "not a url".into(),
            ..Default::default()
        };
        assert!(matches!(
            InfluxDbClient::new(&config),
            Err(DatabaseError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_onboarding_request_shape() {
        let request = OnboardingRequest {
            username: "admin",
            password: "pw",
            org: "o",
            bucket: "b",
            retention_period_seconds: 7200,
            token: "t",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["retentionPeriodSeconds"], 7200);
        assert_eq!(json["org"], "o");
    }

    #[tokio::test]
    async fn test_write_to_unresponsive_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold the connection without ever answering.
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let config = InfluxDbConfig {
            address: format!("http://{}", addr),
            write_timeout_secs: 1,
            ..Default::default()
        };
        let client = InfluxDbClient::new(&config).unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.write(vec!["m v=1i 1".to_string()]),
        )
        .await
        .expect("request gives up on its own");

        assert!(matches!(result, Err(DatabaseError::Http(_))));
        server.abort();
    }
}
