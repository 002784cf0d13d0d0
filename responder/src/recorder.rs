use crate::metrics_defs::GEO_LOOKUP_FAILURES;
use hyper::HeaderMap;
use policy::CheckUpgradeRequest;
use shared::counter;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;
use telemetry::{GeoLookup, TelemetryCache, TelemetryPoint};

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Turns each version check into a telemetry point. The client address is
/// only used for the location lookup.
pub struct RequestRecorder {
    geo: Arc<dyn GeoLookup>,
    cache: TelemetryCache,
}

impl RequestRecorder {
    pub fn new(geo: Arc<dyn GeoLookup>, cache: TelemetryCache) -> Self {
        RequestRecorder { geo, cache }
    }

    pub fn record(&self, headers: &HeaderMap, request: &CheckUpgradeRequest) {
        let location = client_ip(headers).and_then(|ip| match self.geo.lookup(ip) {
            Ok(location) => location,
            Err(e) => {
                counter!(GEO_LOOKUP_FAILURES).increment(1);
                tracing::error!(error = %e, "Failed to get location for client");
                None
            }
        });

        let point = TelemetryPoint::upgrade_request(
            &request.app_version,
            &request.extra_info,
            location.as_ref(),
            SystemTime::now(),
        );
        self.cache.enqueue(point);
    }
}

/// The rightmost `X-Forwarded-For` address, the one added by our own load
/// balancer.
pub fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let last = headers.get_all(X_FORWARDED_FOR).iter().next_back()?;
    let last = last.to_str().ok()?.rsplit(',').next()?.trim();
    last.parse().ok()
}
