use std::time::Duration;

use async_trait::async_trait;
use prost::Message;
use tonic::codec::CompressionEncoding;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use super::{Transport, base_url};
use crate::envelope::Signer;
use crate::error::MetricsError;
use crate::model::MetricBatch;
use crate::proto::metrics_client::MetricsClient;
use crate::proto::{self, REAL_IP_METADATA, SIGNATURE_METADATA, UpdateMetricsRequest};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends batches through the `UpdateMetrics` RPC.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    client: MetricsClient<Channel>,
    signer: Option<Signer>,
    real_ip: Option<String>,
}

impl GrpcTransport {
    /// Creates a client whose connection is established on first use.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect_lazy(
        address: &str,
        signer: Option<Signer>,
        real_ip: Option<String>,
    ) -> Result<Self, MetricsError> {
        let endpoint = Endpoint::from_shared(base_url(address))
            .map_err(|e| MetricsError::Delivery(format!("invalid gRPC address {address:?}: {e}")))?
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT);

        let client = MetricsClient::new(endpoint.connect_lazy())
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);

        Ok(Self {
            client,
            signer,
            real_ip,
        })
    }
}

fn metadata_value(value: &str) -> Result<MetadataValue<tonic::metadata::Ascii>, MetricsError> {
    MetadataValue::try_from(value)
        .map_err(|e| MetricsError::Delivery(format!("invalid metadata value {value:?}: {e}")))
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn send(&self, batch: &MetricBatch) -> Result<(), MetricsError> {
        let message = UpdateMetricsRequest {
            metrics: batch.metrics().iter().map(proto::Metric::from).collect(),
        };
        let signature = self
            .signer
            .as_ref()
            .map(|s| s.sign(&message.encode_to_vec()));

        let mut request = tonic::Request::new(message);
        if let Some(signature) = signature {
            request
                .metadata_mut()
                .insert(SIGNATURE_METADATA, metadata_value(&signature)?);
        }
        if let Some(ip) = &self.real_ip {
            request
                .metadata_mut()
                .insert(REAL_IP_METADATA, metadata_value(ip)?);
        }

        let mut client = self.client.clone();
        client.update_metrics(request).await.map_err(|status| {
            MetricsError::Delivery(format!("{:?}: {}", status.code(), status.message()))
        })?;

        debug!(records = batch.len(), "batch delivered over gRPC");
        Ok(())
    }

    fn protocol(&self) -> &'static str {
        "grpc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metric;
    use crate::proto::metrics_server::{Metrics, MetricsServer};
    use crate::proto::{Empty, ListAllMetricsResponse};
    use std::sync::{Arc, Mutex};
    use tokio_stream::wrappers::TcpListenerStream;
    use tonic::{Request, Response, Status};

    #[derive(Default, Clone)]
    struct Recorder {
        received: Arc<Mutex<Vec<(Option<String>, Option<String>, UpdateMetricsRequest)>>>,
    }

    #[tonic::async_trait]
    impl Metrics for Recorder {
        async fn get_metric(
            &self,
            _request: Request<proto::Metric>,
        ) -> Result<Response<proto::Metric>, Status> {
            Err(Status::unimplemented("get"))
        }

        async fn update_metric(
            &self,
            _request: Request<proto::Metric>,
        ) -> Result<Response<Empty>, Status> {
            Err(Status::unimplemented("update"))
        }

        async fn update_metrics(
            &self,
            request: Request<UpdateMetricsRequest>,
        ) -> Result<Response<Empty>, Status> {
            let get = |key: &str| {
                request
                    .metadata()
                    .get(key)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            let sig = get(SIGNATURE_METADATA);
            let ip = get(REAL_IP_METADATA);
            if ip.as_deref() == Some("0.0.0.0") {
                return Err(Status::unavailable("try later"));
            }
            self.received
                .lock()
                .unwrap()
                .push((sig, ip, request.into_inner()));
            Ok(Response::new(Empty {}))
        }

        async fn list_all_metrics(
            &self,
            _request: Request<Empty>,
        ) -> Result<Response<ListAllMetricsResponse>, Status> {
            Ok(Response::new(ListAllMetricsResponse::default()))
        }
    }

    async fn spawn(recorder: Recorder) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(
                    MetricsServer::new(recorder)
                        .accept_compressed(CompressionEncoding::Gzip)
                        .send_compressed(CompressionEncoding::Gzip),
                )
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn test_sends_signed_batch() {
        let recorder = Recorder::default();
        let address = spawn(recorder.clone()).await;

        let transport = GrpcTransport::connect_lazy(
            &address,
            Some(Signer::new(b"secret")),
            Some("10.0.0.7".into()),
        )
        .unwrap();
        let batch: MetricBatch =
            vec![Metric::gauge("Load1", 0.5), Metric::counter("PollCount", 2)].into();
        transport.send(&batch).await.unwrap();

        let received = recorder.received.lock().unwrap();
        let (sig, ip, message) = &received[0];
        assert_eq!(ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(message.metrics.len(), 2);
        let expected = Signer::new(b"secret").sign(&message.encode_to_vec());
        assert_eq!(sig.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_error_status_is_retryable_delivery_failure() {
        let address = spawn(Recorder::default()).await;

        let transport =
            GrpcTransport::connect_lazy(&address, None, Some("0.0.0.0".into())).unwrap();
        let batch: MetricBatch = vec![Metric::counter("PollCount", 1)].into();
        let err = transport.send(&batch).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("try later"));
    }
}
