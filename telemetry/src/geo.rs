//! Coarse client location from a MaxMind city database.
//!
//! Only city and country are derived. The address itself is never stored.

use maxminddb::{MaxMindDBError, Reader};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

const LOCALE: &str = "en";

#[derive(thiserror::Error, Debug)]
pub enum GeoError {
    #[error("failed to open geo database {path:?}: {source}")]
    Open {
        path: String,
        source: MaxMindDBError,
    },
    #[error("geo lookup failed: {0}")]
    Lookup(#[from] MaxMindDBError),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Location {
    pub city: String,
    pub country: String,
    pub country_iso_code: String,
}

pub trait GeoLookup: Send + Sync {
    /// `Ok(None)` when the address is not covered by the database.
    fn lookup(&self, ip: IpAddr) -> Result<Option<Location>, GeoError>;
}

/// Used when no database is configured. Never locates anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoGeoLookup;

impl GeoLookup for NoGeoLookup {
    fn lookup(&self, _ip: IpAddr) -> Result<Option<Location>, GeoError> {
        Ok(None)
    }
}

#[derive(Deserialize, Default)]
struct NamedRecord {
    #[serde(default)]
    names: HashMap<String, String>,
    #[serde(default)]
    iso_code: Option<String>,
}

#[derive(Deserialize)]
struct CityRecord {
    #[serde(default)]
    city: Option<NamedRecord>,
    #[serde(default)]
    country: Option<NamedRecord>,
}

pub struct MaxMindGeoLookup {
    reader: Reader<Vec<u8>>,
}

impl MaxMindGeoLookup {
    pub fn open(path: &Path) -> Result<Self, GeoError> {
        let reader = Reader::open_readfile(path).map_err(|source| GeoError::Open {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(
            path = %path.display(),
            database_type = reader.metadata.database_type.as_str(),
            "Opened geo database"
        );
        Ok(MaxMindGeoLookup { reader })
    }
}

impl GeoLookup for MaxMindGeoLookup {
    fn lookup(&self, ip: IpAddr) -> Result<Option<Location>, GeoError> {
        let record: CityRecord = match self.reader.lookup(ip) {
            Ok(record) => record,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let city = record.city.unwrap_or_default();
        let country = record.country.unwrap_or_default();
        Ok(Some(Location {
            city: city.names.get(LOCALE).cloned().unwrap_or_default(),
            country: country.names.get(LOCALE).cloned().unwrap_or_default(),
            country_iso_code: country.iso_code.unwrap_or_default(),
        }))
    }
}
