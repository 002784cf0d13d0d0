use crate::point::TelemetryPoint;
use crate::sink::{SinkError, TelemetrySink};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Notify, Semaphore};

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub authorization: Option<String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn query_param(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

pub struct MockResponse {
    status: u16,
    body: String,
}

impl MockResponse {
    pub fn status(status: u16) -> Self {
        MockResponse {
            status,
            body: String::new(),
        }
    }

    pub fn json(status: u16, body: &str) -> Self {
        MockResponse {
            status,
            body: body.to_string(),
        }
    }
}

/// Minimal InfluxDB stand-in on a random local port. Records every request
/// and answers with whatever `respond` returns for it.
pub struct MockInflux {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockInflux {
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock influx");
        let addr = listener.local_addr().expect("local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond = Arc::new(respond);

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let respond = respond.clone();
                tokio::spawn(async move {
                    let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let recorded = recorded.clone();
                        let respond = respond.clone();
                        async move {
                            let method = req.method().to_string();
                            let path = req.uri().path().to_string();
                            let query = req.uri().query().unwrap_or_default().to_string();
                            let authorization = req
                                .headers()
                                .get(hyper::header::AUTHORIZATION)
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string);
                            let body = req
                                .into_body()
                                .collect()
                                .await
                                .map(|c| String::from_utf8_lossy(&c.to_bytes()).into_owned())
                                .unwrap_or_default();

                            let request = RecordedRequest {
                                method,
                                path,
                                query,
                                authorization,
                                body,
                            };
                            let response = respond(&request);
                            recorded.lock().push(request);

                            Response::builder()
                                .status(response.status)
                                .header("content-type", "application/json")
                                .body(Full::new(Bytes::from(response.body)))
                        }
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        MockInflux { addr, requests }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

/// Sink that keeps every batch it is given.
#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<TelemetryPoint>>>,
    writes_started: AtomicUsize,
    notify: Notify,
    gate: Option<Semaphore>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        RecordingSink {
            fail: true,
            ..Default::default()
        }
    }

    /// Every write blocks until [`RecordingSink::release`] is called.
    pub fn stalled() -> Self {
        RecordingSink {
            gate: Some(Semaphore::new(0)),
            ..Default::default()
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.close();
        }
    }

    pub fn batches(&self) -> Vec<Vec<TelemetryPoint>> {
        self.batches.lock().clone()
    }

    /// Waits until at least `count` batches were written.
    pub async fn wait_for_batches(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.notify.notified();
                if self.batches.lock().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for batches");
    }

    /// Waits until at least `count` writes were started, finished or not.
    pub async fn wait_for_writes(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.notify.notified();
                if self.writes_started.load(Ordering::SeqCst) >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("timed out waiting for writes");
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    async fn write(&self, batch: &[TelemetryPoint]) -> Result<(), SinkError> {
        self.writes_started.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
        if let Some(gate) = &self.gate {
            // Fails once the gate is closed
            let _ = gate.acquire().await;
        }

        self.batches.lock().push(batch.to_vec());
        self.notify.notify_waiters();
        if self.fail {
            return Err(SinkError::Rejected {
                status: 500,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}
