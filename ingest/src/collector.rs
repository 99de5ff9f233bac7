//! Delivery of record batches to the analytics collector.

use crate::batch::OutboundRecord;
use crate::errors::DeliveryError;
use async_trait::async_trait;
use shared::APPLICATION_ID_HEADER;
use url::Url;

/// Downstream sink for sampled record batches. A flush hands its whole batch
/// to the sink as one unit; empty batches are legal and the sink decides
/// whether anything goes on the wire.
#[async_trait]
pub trait EventCollector: Send + Sync {
    async fn deliver_batch(&self, batch: Vec<OutboundRecord>) -> Result<(), DeliveryError>;
}

/// Posts batches to the collector's batch ingestion endpoint.
pub struct HttpCollector {
    client: reqwest::Client,
    batch_url: Url,
    application_id: String,
}

impl HttpCollector {
    pub fn new(base_url: &Url, application_id: String) -> Result<Self, DeliveryError> {
        Ok(HttpCollector {
            client: reqwest::Client::new(),
            batch_url: base_url.join("v1/events/batch")?,
            application_id,
        })
    }
}

#[async_trait]
impl EventCollector for HttpCollector {
    async fn deliver_batch(&self, batch: Vec<OutboundRecord>) -> Result<(), DeliveryError> {
        if batch.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.batch_url.clone())
            .header(APPLICATION_ID_HEADER, &self.application_id)
            .json(&batch)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeliveryError::Status(response.status()));
        }
        Ok(())
    }
}
