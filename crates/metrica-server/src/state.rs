//! Shared application state and the global allocator.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;

use metrica_core::envelope::Opener;
use metrica_core::net::TrustedSubnet;
use metrica_core::service::MetricsService;

/// Handed to every HTTP handler and middleware. Cheap to clone.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) service: Arc<MetricsService>,
    pub(crate) opener: Arc<Opener>,
    pub(crate) trusted_subnet: Option<TrustedSubnet>,
}

impl AppState {
    pub(crate) fn new(
        service: Arc<MetricsService>,
        opener: Opener,
        trusted_subnet: Option<TrustedSubnet>,
    ) -> Self {
        Self {
            service,
            opener: Arc::new(opener),
            trusted_subnet,
        }
    }
}
