//! The upgrade responder service: answers version checks from the
//! precomputed policy and records one telemetry point per check.

pub mod config;
pub mod errors;
mod metrics_defs;
pub mod recorder;
pub mod service;
#[cfg(test)]
mod testutils;

use crate::config::{Config, Listener};
use crate::errors::ResponderError;
use crate::recorder::RequestRecorder;
use crate::service::UpgradeResponderService;
use policy::{DecisionEngine, ResponseConfig};
use std::sync::Arc;
use telemetry::influx::database_name;
use telemetry::{CacheFlusher, GeoLookup, InfluxSink, MaxMindGeoLookup, NoGeoLookup};
use tokio_util::sync::CancellationToken;

pub use metrics_defs::ALL_METRICS;

/// Loads the response configuration and precomputes every decision.
pub fn load_engine(config: &Config) -> Result<DecisionEngine, ResponderError> {
    let response_config = ResponseConfig::from_file(&config.response_config)?;
    tracing::info!(
        path = %config.response_config.display(),
        rules = response_config.rules.len(),
        versions = response_config.versions.len(),
        "Loaded response config"
    );
    Ok(DecisionEngine::new(response_config, &config.query_period)?)
}

/// The request-side recorder and the flusher that drains it.
struct Telemetry {
    recorder: Arc<RequestRecorder>,
    flusher: CacheFlusher,
}

/// Opens the geo database and provisions the time-series database. Returns
/// `None` when telemetry is not configured.
async fn start_telemetry(config: &Config) -> Result<Option<Telemetry>, ResponderError> {
    let Some(influx) = &config.influxdb else {
        tracing::info!("No InfluxDB configured, telemetry is disabled");
        return Ok(None);
    };

    let geo: Arc<dyn GeoLookup> = match &config.geodb {
        Some(path) => Arc::new(MaxMindGeoLookup::open(path)?),
        None => {
            tracing::warn!("No geo database configured, telemetry will not include locations");
            Arc::new(NoGeoLookup)
        }
    };

    let sink = InfluxSink::new(influx, database_name(&config.application_name))?;
    sink.provision(&config.query_period).await?;
    tracing::info!(database = sink.database(), "InfluxDB provisioned");

    let (flusher, cache) = CacheFlusher::new(
        config.telemetry_cache.size,
        config.telemetry_cache.sync_interval(),
        Arc::new(sink),
    );
    Ok(Some(Telemetry {
        recorder: Arc::new(RequestRecorder::new(geo, cache)),
        flusher,
    }))
}

/// Serves until `shutdown` is cancelled, then waits for the final telemetry
/// flush. Startup fails on any configuration, policy or provisioning error.
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<(), ResponderError> {
    config.validate()?;
    shared::metrics_defs::describe_all(ALL_METRICS);
    shared::metrics_defs::describe_all(telemetry::ALL_METRICS);

    let engine = Arc::new(load_engine(&config)?);
    let telemetry = start_telemetry(&config).await?;
    serve(&config.listener, engine, telemetry, shutdown).await
}

async fn serve(
    listener: &Listener,
    engine: Arc<DecisionEngine>,
    telemetry: Option<Telemetry>,
    shutdown: CancellationToken,
) -> Result<(), ResponderError> {
    // Stopped only once every connection has drained
    let flusher_shutdown = CancellationToken::new();
    let (recorder, flusher_task) = match telemetry {
        Some(Telemetry { recorder, flusher }) => (
            Some(recorder),
            Some(tokio::spawn(flusher.run(flusher_shutdown.clone()))),
        ),
        None => (None, None),
    };

    let service = UpgradeResponderService::new(engine, recorder);
    let result =
        shared::http::run_http_service(&listener.host, listener.port, service, shutdown).await;

    flusher_shutdown.cancel();
    if let Some(task) = flusher_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Telemetry flusher panicked");
        }
    }

    tracing::info!("Upgrade responder stopped");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::testutils::CollectingSink;
    use std::path::Path;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn config(port: u16) -> Config {
        Config {
            listener: Listener {
                host: "127.0.0.1".into(),
                port,
            },
            application_name: "test_app".into(),
            response_config: Path::new(env!("CARGO_MANIFEST_DIR"))
                .join("../policy/testdata/test-config.json"),
            query_period: "30m".into(),
            geodb: None,
            influxdb: None,
            telemetry_cache: CacheConfig::default(),
        }
    }

    #[test]
    fn test_load_engine() {
        let engine = load_engine(&config(8314)).unwrap();
        assert_eq!(engine.precomputed().len(), 2);
        assert_eq!(engine.default_versions().len(), 3);

        let mut missing = config(8314);
        missing.response_config = "/does/not/exist.json".into();
        assert!(matches!(
            load_engine(&missing),
            Err(ResponderError::ResponseConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_config() {
        let result = run(config(0), CancellationToken::new()).await;
        assert!(matches!(result, Err(ResponderError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_run_serves_until_shutdown() {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(config(19472), shutdown.clone()));

        // Give the listener a moment to bind
        tokio::time::sleep(Duration::from_millis(200)).await;
        let client = reqwest::Client::new();

        let health = client
            .get("http://127.0.0.1:19472/v1/healthcheck")
            .send()
            .await
            .expect("healthcheck");
        assert_eq!(health.status(), 200);

        let json: serde_json::Value = client
            .post("http://127.0.0.1:19472/v1/checkupgrade")
            .body(r#"{"appVersion": "3.5.0", "extraInfo": {"platform": "linux-x64", "platformVersion": "6.1"}}"#)
            .send()
            .await
            .expect("check upgrade")
            .json()
            .await
            .expect("json body");
        assert_eq!(json["requestIntervalInMinutes"], 30);
        let supported: Vec<&str> = json["versions"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|v| v["supported"] == true)
            .map(|v| v["name"].as_str().unwrap())
            .collect();
        assert_eq!(supported, ["2.0.0", "3.0.0"]);

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("responder did not stop")
            .expect("join");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_in_flight_request_is_part_of_final_flush() {
        let engine = Arc::new(load_engine(&config(19473)).unwrap());
        let sink = Arc::new(CollectingSink::default());
        let (flusher, cache) = CacheFlusher::new(100, Duration::from_secs(3600), sink.clone());
        let telemetry = Telemetry {
            recorder: Arc::new(RequestRecorder::new(Arc::new(NoGeoLookup), cache)),
            flusher,
        };

        let shutdown = CancellationToken::new();
        let listener = config(19473).listener;
        let server_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            serve(&listener, engine, Some(telemetry), server_shutdown).await
        });
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Headers now, body only after shutdown has started
        let body = r#"{"appVersion": "1.0.0"}"#;
        let mut stream = TcpStream::connect("127.0.0.1:19473").await.unwrap();
        stream
            .write_all(
                format!(
                    "POST /v1/checkupgrade HTTP/1.1\r\nhost: localhost\r\ncontent-length: {}\r\n\r\n",
                    body.len()
                )
                .as_bytes(),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        stream.write_all(body.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("responder did not stop")
            .expect("join");
        assert!(result.is_ok());

        let points = sink.points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].tag("app_version"), Some("1.0.0"));
    }
}
