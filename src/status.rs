//! Refund status lookup
//!
//! Fetches structured refund records for a user from the refund-status
//! service and formats them into a text block the router embeds in an
//! enhanced prompt. An empty record list is the "no data found" sentinel,
//! not an error.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RefundLookupConfig;
use crate::{Error, Result};

/// One refund record as returned by the refund-status service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefundRecord {
    /// Filing this refund belongs to
    pub filing_id: Option<String>,
    /// Taxing jurisdiction (federal or state code)
    pub jurisdiction: Option<String>,
    /// Upstream tracking id
    pub tracking_id: Option<String>,
    /// Tax year of the filing
    pub tax_year: Option<u16>,
    /// Date the return was filed
    pub filing_date: Option<String>,
    /// Refund amount in dollars
    pub amount: Option<f64>,
    /// Current refund status
    pub status: Option<String>,
    /// Timestamp of the last upstream update
    pub last_updated_at: Option<String>,
    /// Estimated arrival date
    pub eta_date: Option<String>,
    /// Estimated arrival window in days
    pub eta_window_days: Option<u32>,
    /// Confidence of the arrival estimate
    pub eta_confidence: Option<f64>,
}

/// Result of a status lookup: records, or the no-data sentinel
#[derive(Debug, Clone)]
pub enum StatusReport {
    /// One or more refund records were found
    Records(Vec<RefundRecord>),
    /// The service answered but has nothing for this user
    NoData,
}

impl StatusReport {
    /// Render the report as a text block for prompt embedding
    #[must_use]
    pub fn to_prompt_block(&self) -> String {
        match self {
            Self::NoData => "No refund information found for this user.".to_string(),
            Self::Records(records) => {
                let lines: Vec<String> = records.iter().map(format_record).collect();
                lines.join("\n")
            }
        }
    }
}

fn or_na(value: Option<&str>) -> &str {
    value.unwrap_or("N/A")
}

/// Flatten one record into the bracketed line the prompt carries
fn format_record(record: &RefundRecord) -> String {
    let mut line = String::from("[ ");
    let _ = write!(line, "Filing ID: {}, ", or_na(record.filing_id.as_deref()));
    let _ = write!(line, "Jurisdiction: {}, ", or_na(record.jurisdiction.as_deref()));
    let _ = write!(line, "Tracking ID: {}, ", or_na(record.tracking_id.as_deref()));
    match record.tax_year {
        Some(year) => {
            let _ = write!(line, "Tax Year: {year}, ");
        }
        None => line.push_str("Tax Year: N/A, "),
    }
    let _ = write!(line, "Filing Date: {}, ", or_na(record.filing_date.as_deref()));
    let _ = write!(line, "Refund Amount: ${:.2}, ", record.amount.unwrap_or(0.0));
    let _ = write!(
        line,
        "Refund Status: {}, ",
        record.status.as_deref().unwrap_or("UNKNOWN")
    );
    // Timestamps come back as RFC 3339; only the date part is useful here
    let updated = record
        .last_updated_at
        .as_deref()
        .map(|ts| ts.chars().take(10).collect::<String>());
    let _ = write!(line, "Last Updated: {}, ", or_na(updated.as_deref()));
    let _ = write!(
        line,
        "Estimated Refund Arrival Date: {}, ",
        or_na(record.eta_date.as_deref())
    );
    match record.eta_window_days {
        Some(days) => {
            let _ = write!(line, "Estimated Refund Arrival Window: {days}, ");
        }
        None => line.push_str("Estimated Refund Arrival Window: N/A, "),
    }
    match record.eta_confidence {
        Some(confidence) => {
            let _ = write!(line, "Estimated Refund Arrival Confidence: {confidence}");
        }
        None => line.push_str("Estimated Refund Arrival Confidence: N/A"),
    }
    line.push_str(" ]");
    line
}

/// Refund status collaborator
#[async_trait]
pub trait StatusLookup: Send + Sync {
    /// Fetch the refund status report for a user
    ///
    /// # Errors
    ///
    /// Returns a status lookup error on network fault or non-2xx upstream
    /// response, carrying the upstream status code when available.
    async fn status_report(&self, user_id: &str) -> Result<StatusReport>;
}

/// HTTP client for the refund-status service
pub struct HttpStatusLookup {
    client: Client,
    url: String,
}

impl HttpStatusLookup {
    /// Create a lookup client from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &RefundLookupConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl StatusLookup for HttpStatusLookup {
    async fn status_report(&self, user_id: &str) -> Result<StatusReport> {
        let response = self
            .client
            .get(&self.url)
            .header("X-USER-ID", user_id)
            .send()
            .await
            .map_err(|e| Error::status_lookup(e.to_string(), None))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::status_lookup(
                format!("upstream status {status}"),
                Some(status.as_u16()),
            ));
        }

        let records: Vec<RefundRecord> = response
            .json()
            .await
            .map_err(|e| Error::status_lookup(format!("malformed response: {e}"), None))?;

        debug!(user_id = %user_id, records = records.len(), "Refund status fetched");

        if records.is_empty() {
            Ok(StatusReport::NoData)
        } else {
            Ok(StatusReport::Records(records))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_data_sentinel() {
        let report = StatusReport::NoData;
        assert_eq!(
            report.to_prompt_block(),
            "No refund information found for this user."
        );
    }

    #[test]
    fn test_record_formatting() {
        let record = RefundRecord {
            filing_id: Some("F-100".to_string()),
            jurisdiction: Some("US-FED".to_string()),
            tax_year: Some(2024),
            amount: Some(1523.5),
            status: Some("APPROVED".to_string()),
            last_updated_at: Some("2025-04-02T11:30:00Z".to_string()),
            ..RefundRecord::default()
        };

        let block = StatusReport::Records(vec![record]).to_prompt_block();
        assert!(block.contains("Filing ID: F-100"));
        assert!(block.contains("Refund Amount: $1523.50"));
        assert!(block.contains("Refund Status: APPROVED"));
        assert!(block.contains("Last Updated: 2025-04-02,"));
        assert!(block.contains("Tracking ID: N/A"));
    }

    #[test]
    fn test_records_decode_from_camel_case() {
        let payload = r#"[{"filingId": "F-1", "taxYear": 2024, "amount": 900.0, "status": "SENT"}]"#;
        let records: Vec<RefundRecord> = serde_json::from_str(payload).unwrap();
        assert_eq!(records[0].filing_id.as_deref(), Some("F-1"));
        assert_eq!(records[0].tax_year, Some(2024));
    }

    #[test]
    fn test_multiple_records_one_per_line() {
        let records = vec![RefundRecord::default(), RefundRecord::default()];
        let block = StatusReport::Records(records).to_prompt_block();
        assert_eq!(block.lines().count(), 2);
    }
}
