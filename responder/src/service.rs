use crate::errors::ResponderError;
use crate::metrics_defs::{CHECK_UPGRADE_DURATION, CHECK_UPGRADE_REQUESTS};
use crate::recorder::RequestRecorder;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use policy::{CheckUpgradeRequest, DecisionEngine};
use shared::http::{make_boxed_error_response, make_json_response, make_text_response};
use shared::{counter, histogram};
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

pub const CHECK_UPGRADE_PATH: &str = "/v1/checkupgrade";
pub const HEALTHCHECK_PATH: &str = "/v1/healthcheck";
/// Largest accepted check-upgrade body, in bytes.
pub const MAX_BODY_SIZE: usize = 64 * 1024;

type ServiceResponse = Response<BoxBody<Bytes, ResponderError>>;

pub struct UpgradeResponderService {
    engine: Arc<DecisionEngine>,
    recorder: Option<Arc<RequestRecorder>>,
}

impl UpgradeResponderService {
    /// Without a recorder no telemetry is collected.
    pub fn new(engine: Arc<DecisionEngine>, recorder: Option<Arc<RequestRecorder>>) -> Self {
        Self { engine, recorder }
    }
}

impl Service<Request<Incoming>> for UpgradeResponderService {
    type Response = ServiceResponse;
    type Error = ResponderError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let engine = self.engine.clone();
        let recorder = self.recorder.clone();

        Box::pin(async move { Ok(handle(req, &engine, recorder.as_deref()).await) })
    }
}

pub(crate) async fn handle<B>(
    req: Request<B>,
    engine: &DecisionEngine,
    recorder: Option<&RequestRecorder>,
) -> ServiceResponse
where
    B: Body,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    match (req.method(), req.uri().path()) {
        (&Method::POST, CHECK_UPGRADE_PATH) => check_upgrade(req, engine, recorder).await,
        (&Method::GET, HEALTHCHECK_PATH) => make_text_response(StatusCode::OK, String::new()),
        _ => make_boxed_error_response(StatusCode::NOT_FOUND),
    }
}

async fn check_upgrade<B>(
    req: Request<B>,
    engine: &DecisionEngine,
    recorder: Option<&RequestRecorder>,
) -> ServiceResponse
where
    B: Body,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let start = Instant::now();
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, MAX_BODY_SIZE).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read check-upgrade body");
            counter!(CHECK_UPGRADE_REQUESTS, "outcome" => "bad_request").increment(1);
            let status = if e.downcast_ref::<LengthLimitError>().is_some() {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            };
            return make_text_response(status, format!("{e}\n"));
        }
    };

    let request: CheckUpgradeRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Malformed check-upgrade request");
            counter!(CHECK_UPGRADE_REQUESTS, "outcome" => "bad_request").increment(1);
            return make_text_response(StatusCode::BAD_REQUEST, format!("{e}\n"));
        }
    };

    if let Some(recorder) = recorder {
        recorder.record(&parts.headers, &request);
    }

    let response = engine.decide(&request);
    counter!(CHECK_UPGRADE_REQUESTS, "outcome" => response.outcome.as_str()).increment(1);

    let result = match serde_json::to_vec(&response) {
        Ok(json) => make_json_response(StatusCode::OK, json),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize check-upgrade response");
            make_boxed_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    };
    histogram!(CHECK_UPGRADE_DURATION).record(start.elapsed().as_secs_f64());
    result
}
