use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tracing::debug;

use super::{Transport, base_url};
use crate::envelope::Sealer;
use crate::error::MetricsError;
use crate::model::MetricBatch;
use crate::{REAL_IP_HEADER, SIGNATURE_HEADER};

/// Batch endpoint on the server.
pub const UPDATES_PATH: &str = "/updates/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends batches as sealed JSON to `POST /updates/`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
    sealer: Sealer,
    real_ip: Option<String>,
}

impl HttpTransport {
    pub fn new(
        address: &str,
        sealer: Sealer,
        real_ip: Option<String>,
    ) -> Result<Self, MetricsError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MetricsError::Delivery(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}{}", base_url(address), UPDATES_PATH),
            sealer,
            real_ip,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &MetricBatch) -> Result<(), MetricsError> {
        let payload = serde_json::to_vec(batch)?;
        let envelope = self.sealer.seal(&payload)?;

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_ENCODING, "gzip")
            .header(CONTENT_TYPE, "application/json");
        if let Some(signature) = &envelope.signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        if let Some(ip) = &self.real_ip {
            request = request.header(REAL_IP_HEADER, ip);
        }

        let response = request
            .body(envelope.body)
            .send()
            .await
            .map_err(|e| MetricsError::Delivery(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            debug!(records = batch.len(), url = %self.url, "batch delivered");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(MetricsError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    fn protocol(&self) -> &'static str {
        "http"
    }
}
