//! Federal Reserve Economic Data (FRED) client.

use super::ServiceClient;
use crate::domain::{FredObservation, PipelineError, ServiceSettings};
use crate::infrastructure::http::ServiceHttpClient;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::info;

#[derive(Clone)]
pub struct FredClient {
    http: ServiceHttpClient,
}

fn check_series_id(series_id: &str) -> Result<String> {
    let id = series_id.trim().to_uppercase();
    if id.is_empty() || id.len() > 64 || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(PipelineError::validation(format!("invalid FRED series id: {:?}", series_id))
            .with_context("series_id", series_id)
            .into());
    }
    Ok(id)
}

impl FredClient {
    pub fn new(settings: ServiceSettings) -> Result<Self> {
        Ok(Self {
            http: ServiceHttpClient::new(settings)?,
        })
    }

    /// Observations for one series, optionally bounded by date.
    ///
    /// GET /series/observations?series_id=DFF&file_type=json
    pub async fn fetch_series_observations(
        &self,
        series_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Value> {
        let id = check_series_id(series_id)?;
        info!("Fetching FRED observations: {}", id);

        let mut query = vec![("series_id", id), ("file_type", "json".to_string())];
        if let Some(start) = start {
            query.push(("observation_start", start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = end {
            query.push(("observation_end", end.format("%Y-%m-%d").to_string()));
        }
        self.http.get_json("/series/observations", &query).await
    }

    /// Series metadata (title, units, frequency).
    ///
    /// GET /series?series_id=GDP&file_type=json
    pub async fn fetch_series_info(&self, series_id: &str) -> Result<Value> {
        let id = check_series_id(series_id)?;
        self.http
            .get_json("/series", &[("series_id", id), ("file_type", "json".to_string())])
            .await
    }

    /// Full-text series search.
    ///
    /// GET /series/search?search_text=inflation&file_type=json
    pub async fn search_series(&self, text: &str, limit: u32) -> Result<Value> {
        if text.trim().is_empty() {
            return Err(PipelineError::validation("search text must not be empty").into());
        }
        self.http
            .get_json(
                "/series/search",
                &[
                    ("search_text", text.trim().to_string()),
                    ("limit", limit.clamp(1, 1000).to_string()),
                    ("file_type", "json".to_string()),
                ],
            )
            .await
    }
}

#[async_trait]
impl ServiceClient for FredClient {
    fn settings(&self) -> &ServiceSettings {
        self.http.settings()
    }

    async fn health_check(&self) -> Result<()> {
        self.fetch_series_info("GDP").await.map(|_| ())
    }
}

/// Parse the `observations` array. FRED marks missing values with ".".
pub fn parse_observations(value: &Value) -> Result<Vec<FredObservation>> {
    let rows = value["observations"]
        .as_array()
        .ok_or_else(|| PipelineError::data("FRED response has no observations array"))?;

    rows.iter()
        .map(|row| {
            let raw_date = row["date"].as_str().unwrap_or_default();
            let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d").map_err(|_| {
                PipelineError::data(format!("invalid FRED observation date: {:?}", raw_date))
            })?;
            let value = row["value"].as_str().and_then(|v| v.parse::<f64>().ok());
            Ok(FredObservation { date, value })
        })
        .collect()
}

/// Most recent observation that carries a value.
pub fn latest_observation(observations: &[FredObservation]) -> Option<&FredObservation> {
    observations.iter().rev().find(|o| o.value.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_observations_handles_missing_values() {
        let value = json!({
            "observations": [
                {"date": "2024-01-01", "value": "5.33"},
                {"date": "2024-01-02", "value": "5.33"},
                {"date": "2024-01-03", "value": "."}
            ]
        });
        let obs = parse_observations(&value).unwrap();
        assert_eq!(obs.len(), 3);
        assert_eq!(obs[0].value, Some(5.33));
        assert_eq!(obs[2].value, None);

        let latest = latest_observation(&obs).unwrap();
        assert_eq!(latest.date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }

    #[test]
    fn test_parse_observations_rejects_bad_shape() {
        assert!(parse_observations(&json!({"error_code": 400})).is_err());
        assert!(parse_observations(&json!({"observations": [{"date": "soon", "value": "1"}]})).is_err());
    }

    #[test]
    fn test_series_id_validation() {
        assert_eq!(check_series_id(" dgs10 ").unwrap(), "DGS10");
        assert!(check_series_id("").is_err());
        assert!(check_series_id("DFF&api_key=x").is_err());
    }
}
