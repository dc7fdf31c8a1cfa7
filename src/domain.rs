use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GeocoderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressStatus {
    Pending,
    Success,
    Failed,
}

impl AddressStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AddressStatus::Pending)
    }
}

impl fmt::Display for AddressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AddressStatus::Pending => "Pending",
            AddressStatus::Success => "Success",
            AddressStatus::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// A resolved location as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
    pub geocoded_address: Option<String>,
}

/// One address moving through a geocoding pass.
///
/// The input text is fixed at construction. Status only ever moves from
/// `Pending` to `Success` or `Failed`; the transition methods refuse to touch
/// a record that is already terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRecord {
    full_address: String,

    pub province: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub street: Option<String>,
    pub alley: Option<String>,
    pub building: Option<String>,

    latitude: Option<f64>,
    longitude: Option<f64>,
    geocoded_address: Option<String>,
    status: AddressStatus,
    error_message: Option<String>,

    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl AddressRecord {
    /// Create a pending record. Empty or whitespace-only text is rejected;
    /// accepted text is stored exactly as given.
    pub fn new(full_address: impl Into<String>) -> Result<Self> {
        let full_address = full_address.into();
        if full_address.trim().is_empty() {
            return Err(GeocoderError::InvalidInput("address text is empty".into()));
        }
        Ok(Self {
            full_address,
            province: None,
            city: None,
            district: None,
            street: None,
            alley: None,
            building: None,
            latitude: None,
            longitude: None,
            geocoded_address: None,
            status: AddressStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
            updated_at: None,
        })
    }

    pub fn full_address(&self) -> &str {
        &self.full_address
    }

    pub fn status(&self) -> AddressStatus {
        self.status
    }

    pub fn is_pending(&self) -> bool {
        self.status == AddressStatus::Pending
    }

    pub fn latitude(&self) -> Option<f64> {
        self.latitude
    }

    pub fn longitude(&self) -> Option<f64> {
        self.longitude
    }

    pub fn geocoded_address(&self) -> Option<&str> {
        self.geocoded_address.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Record a successful lookup. Returns false if the record was already terminal.
    pub fn mark_success(&mut self, coordinate: Coordinate) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.latitude = Some(coordinate.latitude);
        self.longitude = Some(coordinate.longitude);
        self.geocoded_address = coordinate.geocoded_address;
        self.status = AddressStatus::Success;
        self.updated_at = Some(Utc::now());
        true
    }

    /// Record a failed lookup. Returns false if the record was already terminal.
    pub fn mark_failed(&mut self, message: impl Into<String>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = AddressStatus::Failed;
        self.error_message = Some(message.into());
        self.updated_at = Some(Utc::now());
        true
    }
}

/// Counts reported when a batch finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_records(records: &[AddressRecord]) -> Self {
        records.iter().fold(
            BatchSummary {
                total: records.len(),
                ..Default::default()
            },
            |mut acc, r| {
                match r.status() {
                    AddressStatus::Success => acc.success += 1,
                    AddressStatus::Failed => acc.failed += 1,
                    AddressStatus::Pending => {}
                }
                acc
            },
        )
    }
}
