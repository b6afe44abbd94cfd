//! gRPC surface: the `metrica.Metrics` service on top of `MetricsService`.

use std::sync::Arc;

use prost::Message;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::codec::CompressionEncoding;
use tonic::{Request, Response, Status};
use tracing::{debug, error, warn};

use metrica_core::envelope::Signer;
use metrica_core::net::TrustedSubnet;
use metrica_core::proto::metrics_server::{Metrics, MetricsServer};
use metrica_core::proto::{
    self, Empty, ListAllMetricsResponse, REAL_IP_METADATA, SIGNATURE_METADATA,
    UpdateMetricsRequest,
};
use metrica_core::service::MetricsService;
use metrica_core::{Metric, MetricsError};

pub(crate) struct MetricsGrpc {
    service: Arc<MetricsService>,
    signer: Option<Signer>,
    trusted_subnet: Option<TrustedSubnet>,
}

impl MetricsGrpc {
    pub(crate) fn new(
        service: Arc<MetricsService>,
        signer: Option<Signer>,
        trusted_subnet: Option<TrustedSubnet>,
    ) -> Self {
        Self {
            service,
            signer,
            trusted_subnet,
        }
    }

    /// Enforces the trusted subnet and, when both sides carry a key, the
    /// signature over the encoded request message.
    fn admit<T: Message>(&self, request: &Request<T>) -> Result<(), Status> {
        let metadata = |key: &str| {
            request
                .metadata()
                .get(key)
                .and_then(|v| v.to_str().ok())
        };

        if let Some(subnet) = &self.trusted_subnet {
            let real_ip = metadata(REAL_IP_METADATA);
            if !subnet.allows(real_ip) {
                warn!(real_ip = real_ip.unwrap_or("-"), %subnet, "gRPC call from untrusted address");
                return Err(Status::permission_denied("client address is not trusted"));
            }
        }

        if let (Some(signer), Some(signature)) = (&self.signer, metadata(SIGNATURE_METADATA)) {
            signer
                .verify(&request.get_ref().encode_to_vec(), signature)
                .map_err(|e| {
                    warn!(error = %e, "gRPC signature rejected");
                    Status::unauthenticated(e.to_string())
                })?;
        }
        Ok(())
    }
}

pub(crate) fn to_status(e: MetricsError) -> Status {
    match e {
        e if e.is_validation() => Status::invalid_argument(e.to_string()),
        MetricsError::NotFound { .. } => Status::not_found(e.to_string()),
        MetricsError::NotSupported { .. } | MetricsError::PersistenceDisabled => {
            Status::unimplemented(e.to_string())
        }
        e => {
            error!(error = %e, "gRPC call failed");
            Status::unknown(e.to_string())
        }
    }
}

#[tonic::async_trait]
impl Metrics for MetricsGrpc {
    async fn get_metric(&self, request: Request<proto::Metric>) -> Result<Response<proto::Metric>, Status> {
        self.admit(&request)?;
        let query = Metric::try_from(request.into_inner()).map_err(to_status)?;
        let value = self
            .service
            .get(&query.id, query.kind)
            .await
            .map_err(to_status)?;
        Ok(Response::new(proto::Metric::from(&Metric::from_value(
            query.id, value,
        ))))
    }

    async fn update_metric(&self, request: Request<proto::Metric>) -> Result<Response<Empty>, Status> {
        self.admit(&request)?;
        let metric = Metric::try_from(request.into_inner()).map_err(to_status)?;
        self.service.update(&metric).await.map_err(to_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn update_metrics(
        &self,
        request: Request<UpdateMetricsRequest>,
    ) -> Result<Response<Empty>, Status> {
        self.admit(&request)?;
        let metrics = request
            .into_inner()
            .metrics
            .into_iter()
            .map(Metric::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(to_status)?;
        self.service.set_batch(&metrics).await.map_err(to_status)?;
        debug!(records = metrics.len(), "gRPC batch applied");
        Ok(Response::new(Empty {}))
    }

    async fn list_all_metrics(
        &self,
        request: Request<Empty>,
    ) -> Result<Response<ListAllMetricsResponse>, Status> {
        self.admit(&request)?;
        let metrics = self
            .service
            .list_all()
            .await
            .to_metrics()
            .iter()
            .map(proto::Metric::from)
            .collect();
        Ok(Response::new(ListAllMetricsResponse { metrics }))
    }
}

/// Serves gRPC on `listener` until `shutdown` fires, then lets in-flight
/// calls finish.
pub(crate) async fn serve(
    listener: TcpListener,
    service: MetricsGrpc,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    let service = MetricsServer::new(service)
        .send_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Gzip);

    tonic::transport::Server::builder()
        .add_service(service)
        .serve_with_incoming_shutdown(
            TcpListenerStream::new(listener),
            shutdown.cancelled_owned(),
        )
        .await
}
