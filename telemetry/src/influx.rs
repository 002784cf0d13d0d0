//! InfluxDB 1.x HTTP sink, plus one-time provisioning of the database and
//! the continuous queries that down-sample raw points.

use crate::point::{FIELD_VALUE, MEASUREMENT, TAG_APP_VERSION, TAG_COUNTRY_ISO_CODE, TelemetryPoint};
use crate::sink::{SinkError, TelemetrySink};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const DATABASE_SUFFIX: &str = "upgrade_responder";
const PRECISION: &str = "ns";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const CQ_DOWN_SAMPLING: &str = "cq_upgrade_request_down_sampling";
pub const CQ_BY_APP_VERSION: &str = "cq_by_app_version_down_sampling";
pub const CQ_BY_COUNTRY_CODE: &str = "cq_by_country_code_down_sampling";
pub const MEASUREMENT_DOWN_SAMPLING: &str = "upgrade_request_down_sampling";
pub const MEASUREMENT_BY_APP_VERSION: &str = "by_app_version_down_sampling";
pub const MEASUREMENT_BY_COUNTRY_CODE: &str = "by_country_code_down_sampling";

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct InfluxConfig {
    pub url: Url,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum ProvisionError {
    #[error("query request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("query {statement:?} rejected with status {status}: {body}")]
    Status {
        statement: String,
        status: u16,
        body: String,
    },
    #[error("query {statement:?} failed: {message}")]
    Query { statement: String, message: String },
}

impl ProvisionError {
    fn is_already_exists(&self) -> bool {
        matches!(self, ProvisionError::Query { message, .. } if message.contains("already exists"))
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct StatementResult {
    #[serde(default)]
    error: Option<String>,
}

/// Name of the database that holds an application's telemetry.
pub fn database_name(application_name: &str) -> String {
    format!("{application_name}_{DATABASE_SUFFIX}")
}

/// The continuous queries that roll raw points up into per-period counts,
/// keyed by name.
pub fn continuous_queries(database: &str, period: &str) -> [(&'static str, String); 3] {
    let select = |name: &str, into: &str, group_by: Option<&str>| {
        let group_by = match group_by {
            Some(tag) => format!("time({period}),{tag}"),
            None => format!("time({period})"),
        };
        format!(
            "CREATE CONTINUOUS QUERY {name} ON {database} BEGIN SELECT count({FIELD_VALUE}) as total INTO {into} FROM {MEASUREMENT} GROUP BY {group_by} END"
        )
    };

    [
        (
            CQ_DOWN_SAMPLING,
            select(CQ_DOWN_SAMPLING, MEASUREMENT_DOWN_SAMPLING, None),
        ),
        (
            CQ_BY_APP_VERSION,
            select(CQ_BY_APP_VERSION, MEASUREMENT_BY_APP_VERSION, Some(TAG_APP_VERSION)),
        ),
        (
            CQ_BY_COUNTRY_CODE,
            select(
                CQ_BY_COUNTRY_CODE,
                MEASUREMENT_BY_COUNTRY_CODE,
                Some(TAG_COUNTRY_ISO_CODE),
            ),
        ),
    ]
}

pub struct InfluxSink {
    client: reqwest::Client,
    base_url: Url,
    database: String,
    user: Option<String>,
    password: Option<String>,
}

impl InfluxSink {
    pub fn new(config: &InfluxConfig, database: String) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(InfluxSink {
            client,
            base_url: config.url.clone(),
            database,
            user: config.user.clone().filter(|u| !u.is_empty()),
            password: config.password.clone().filter(|p| !p.is_empty()),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!("{}/{path}", url.path().trim_end_matches('/'));
        url.set_path(&joined);
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.user {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }

    async fn query(&self, statement: &str) -> Result<(), ProvisionError> {
        let request = self
            .client
            .post(self.endpoint("query"))
            .query(&[("q", statement)]);
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let parsed: Option<QueryResponse> = serde_json::from_str(&body).ok();
        let message = parsed.and_then(|r| {
            r.error
                .or_else(|| r.results.into_iter().find_map(|result| result.error))
        });

        match message {
            Some(message) => Err(ProvisionError::Query {
                statement: statement.to_string(),
                message,
            }),
            None if !status.is_success() => Err(ProvisionError::Status {
                statement: statement.to_string(),
                status: status.as_u16(),
                body,
            }),
            None => Ok(()),
        }
    }

    /// Creates the database and its continuous queries. Safe to run against
    /// an already provisioned database, as long as the period is unchanged.
    pub async fn provision(&self, period: &str) -> Result<(), ProvisionError> {
        self.query(&format!("CREATE DATABASE {}", self.database))
            .await?;
        tracing::debug!(database = %self.database, "Database is either created or already exists");

        for (name, statement) in continuous_queries(&self.database, period) {
            if let Err(e) = self.query(&statement).await {
                if e.is_already_exists() {
                    tracing::error!(
                        continuous_query = name,
                        database = %self.database,
                        "Continuous query already exists with a different definition and cannot be modified. \
                         If the query period changed, drop the continuous query manually and restart"
                    );
                }
                return Err(e);
            }
            tracing::debug!(continuous_query = name, "Created continuous query");
        }

        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for InfluxSink {
    async fn write(&self, batch: &[TelemetryPoint]) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut body = String::with_capacity(batch.len() * 128);
        for point in batch {
            point.write_line_protocol(&mut body);
        }

        let request = self
            .client
            .post(self.endpoint("write"))
            .query(&[("db", self.database.as_str()), ("precision", PRECISION)])
            .body(body);
        let response = self.authorize(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
