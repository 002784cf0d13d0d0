use crate::geo::Location;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::{SystemTime, UNIX_EPOCH};

pub const MEASUREMENT: &str = "upgrade_request";
pub const TAG_APP_VERSION: &str = "app_version";
pub const TAG_CITY: &str = "city";
pub const TAG_COUNTRY: &str = "country";
pub const TAG_COUNTRY_ISO_CODE: &str = "country_isocode";
/// Constant field carried by every point so that `count(value)` counts requests.
pub const FIELD_VALUE: &str = "value";

/// A single time-series record.
#[derive(Clone, Debug, PartialEq)]
pub struct TelemetryPoint {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, i64>,
    timestamp: SystemTime,
}

impl TelemetryPoint {
    pub fn new(measurement: impl Into<String>, timestamp: SystemTime) -> Self {
        TelemetryPoint {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    /// Empty values are dropped; the database rejects empty tag values.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        if key.is_empty() || value.is_empty() {
            self.tags.remove(&key);
        } else {
            self.tags.insert(key, value);
        }
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: i64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// The point recorded for one version check. Client metadata keys are
    /// converted to snake_case; location tags are set last and win over any
    /// client-supplied tag of the same name.
    pub fn upgrade_request<I, K, V>(
        app_version: &str,
        extra_info: I,
        location: Option<&Location>,
        timestamp: SystemTime,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut point = TelemetryPoint::new(MEASUREMENT, timestamp)
            .with_tag(TAG_APP_VERSION, app_version)
            .with_field(FIELD_VALUE, 1);

        for (key, value) in extra_info {
            point = point.with_tag(to_snake_case(key.as_ref()), value.as_ref());
        }

        if let Some(location) = location {
            point = point
                .with_tag(TAG_CITY, location.city.as_str())
                .with_tag(TAG_COUNTRY, location.country.as_str())
                .with_tag(TAG_COUNTRY_ISO_CODE, location.country_iso_code.as_str());
        }

        point
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn field(&self, key: &str) -> Option<i64> {
        self.fields.get(key).copied()
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Appends this point in line protocol, terminated by a newline:
    /// `measurement,tag=v field=1i <unix nanos>`.
    pub fn write_line_protocol(&self, out: &mut String) {
        escape_into(out, &self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            out.push(',');
            escape_into(out, key, &[',', '=', ' ']);
            out.push('=');
            escape_into(out, value, &[',', '=', ' ']);
        }

        let mut separator = ' ';
        for (key, value) in &self.fields {
            out.push(separator);
            escape_into(out, key, &[',', '=', ' ']);
            let _ = write!(out, "={value}i");
            separator = ',';
        }

        let nanos = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let _ = writeln!(out, " {nanos}");
    }
}

/// Line breaks end a line in line protocol and cannot be escaped, so they
/// become an escaped space.
fn escape_into(out: &mut String, value: &str, special: &[char]) {
    for c in value.chars() {
        match c {
            '\n' | '\r' => out.push_str("\\ "),
            '\\' => out.push_str("\\\\"),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}

/// `platformVersion` -> `platform_version`, `HTTPServer` -> `http_server`.
pub fn to_snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && prev != '_' {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }

    out
}
