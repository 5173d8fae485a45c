use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::engine::ledger::{LedgerSettings, OrderLedger};
use crate::engine::matcher::DispatchMatcher;
use crate::geo::EtaModel;
use crate::observability::metrics::Metrics;
use crate::realtime::channel::RealtimeChannel;
use crate::realtime::gateway::ConnectionGateway;
use crate::store::cache::KeyValueCache;
use crate::store::orders::OrderStore;
use crate::store::positions::EphemeralPositionStore;
use crate::store::vendors::VendorRegistry;

pub struct AppState {
    pub tokens: TokenVerifier,
    pub ledger: Arc<OrderLedger>,
    pub matcher: DispatchMatcher,
    pub positions: Arc<EphemeralPositionStore>,
    pub vendors: Arc<VendorRegistry>,
    pub channel: Arc<RealtimeChannel>,
    pub gateway: ConnectionGateway,
    pub eta_model: EtaModel,
    pub default_service_radius_km: f64,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: &Config, cache: Arc<dyn KeyValueCache>, orders: Arc<dyn OrderStore>) -> Self {
        let metrics = Metrics::new();
        let tokens = TokenVerifier::new(config.jwt_secret.as_bytes());

        let positions = Arc::new(EphemeralPositionStore::new(
            cache,
            config.location_ttl_secs,
            config.location_history_ttl_secs,
        ));
        let vendors = Arc::new(VendorRegistry::new());
        let channel = Arc::new(RealtimeChannel::new(
            positions.clone(),
            config.subscriber_buffer_size,
            metrics.clone(),
        ));

        let ledger = Arc::new(OrderLedger::new(
            orders,
            vendors.clone(),
            channel.clone(),
            LedgerSettings {
                fee_schedule: config.fee_schedule,
                tax_rate: config.tax_rate,
                assign_timeout: config.assign_timeout,
            },
            metrics.clone(),
        ));

        let matcher = DispatchMatcher::new(
            ledger.clone(),
            positions.clone(),
            vendors.clone(),
            config.fee_schedule,
            config.eta_model,
            metrics.clone(),
        );

        let gateway = ConnectionGateway::new(
            channel.clone(),
            ledger.clone(),
            positions.clone(),
            tokens.clone(),
        );

        Self {
            tokens,
            ledger,
            matcher,
            positions,
            vendors,
            channel,
            gateway,
            eta_model: config.eta_model,
            default_service_radius_km: config.default_service_radius_km,
            metrics,
        }
    }
}
