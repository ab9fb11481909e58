//! [`HttpSource`]: the upstream JSON endpoints as an [`ObservationSource`].
//!
//! Two POST calls per sample point: `GetPorFecha` for the observations and
//! `GetHoraServer` for the upstream clock. A failed clock call is tolerated;
//! the normaliser falls back to local time.

use std::time::Duration;

use outage_core::{
  failure::{Classify, FailureKind},
  observation::{FetchedSnapshot, RawObservation, SamplePoint, ServerClock},
  source::ObservationSource,
};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
  #[error("failed to build HTTP client: {0}")]
  Client(#[source] reqwest::Error),
  #[error("POST {url} failed: {source}")]
  Request {
    url:    String,
    #[source]
    source: reqwest::Error,
  },
  #[error("POST {url} → {status}")]
  Status { url: String, status: StatusCode },
  #[error("decoding response from {url}: {source}")]
  Decode {
    url:    String,
    #[source]
    source: serde_json::Error,
  },
}

impl Classify for SourceError {
  fn failure_kind(&self) -> FailureKind {
    match self {
      Self::Client(_) => FailureKind::Other,
      Self::Request { source, .. } if source.is_timeout() => FailureKind::Timeout,
      Self::Request { source, .. } if source.is_connect() => FailureKind::Connection,
      Self::Request { source, .. } if source.is_decode() || source.is_body() => {
        FailureKind::Decode
      }
      Self::Request { .. } => FailureKind::Other,
      Self::Status { status, .. } => status_kind(*status),
      Self::Decode { .. } => FailureKind::Decode,
    }
  }
}

fn status_kind(status: StatusCode) -> FailureKind {
  if status == StatusCode::TOO_MANY_REQUESTS {
    FailureKind::RateLimited
  } else if status.is_server_error() {
    FailureKind::Server
  } else {
    FailureKind::Rejected
  }
}

#[derive(Debug, Serialize)]
struct DateQuery {
  anho: i32,
  mes:  u32,
  dia:  u32,
  hora: u32,
}

impl From<SamplePoint> for DateQuery {
  fn from(p: SamplePoint) -> Self {
    Self { anho: p.year(), mes: p.month(), dia: p.day(), hora: p.hour }
  }
}

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Debug, Clone)]
pub struct HttpSource {
  client:   Client,
  base_url: String,
}

impl HttpSource {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(SourceError::Client)?;
    Ok(Self { client, base_url: base_url.trim_end_matches('/').to_owned() })
  }

  fn url(&self, endpoint: &str) -> String { format!("{}/{endpoint}", self.base_url) }

  async fn post<B: Serialize>(&self, endpoint: &str, body: &B) -> Result<String, SourceError> {
    let url = self.url(endpoint);
    let resp = match self.client.post(&url).json(body).send().await {
      Ok(resp) => resp,
      Err(source) => return Err(SourceError::Request { url, source }),
    };

    let status = resp.status();
    if !status.is_success() {
      return Err(SourceError::Status { url, status });
    }
    match resp.text().await {
      Ok(text) => Ok(text),
      Err(source) => Err(SourceError::Request { url, source }),
    }
  }

  async fn observations(&self, point: SamplePoint) -> Result<Vec<RawObservation>, SourceError> {
    let body = self.post("GetPorFecha", &DateQuery::from(point)).await?;
    parse_observations(&body).map_err(|source| SourceError::Decode {
      url: self.url("GetPorFecha"),
      source,
    })
  }

  async fn server_clock(&self) -> ServerClock {
    let payload = match self.post("GetHoraServer", &serde_json::json!({})).await {
      Ok(body) => serde_json::from_str(&body).unwrap_or(serde_json::Value::Null),
      Err(e) => {
        tracing::warn!(error = %e, "server clock request failed");
        serde_json::Value::Null
      }
    };
    ServerClock::from_payload(&payload)
  }
}

/// A `null` body means the upstream has nothing for that point.
fn parse_observations(body: &str) -> Result<Vec<RawObservation>, serde_json::Error> {
  let rows: Option<Vec<RawObservation>> = serde_json::from_str(body)?;
  Ok(rows.unwrap_or_default())
}

impl ObservationSource for HttpSource {
  type Error = SourceError;

  async fn fetch(&self, point: SamplePoint) -> Result<FetchedSnapshot, SourceError> {
    let observations = self.observations(point).await?;
    let server_clock = self.server_clock().await;
    tracing::debug!(
      %point,
      rows = observations.len(),
      clock_ok = server_clock.parsed_ok(),
      "fetched snapshot"
    );
    Ok(FetchedSnapshot { observations, server_clock })
  }
}
