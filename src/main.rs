//! OpenSASE Storefront - cart ledger and checkout service

use anyhow::{Context, Result};
use opensase_storefront::api::{router, AppState};
use opensase_storefront::config::Config;
use opensase_storefront::publisher::{EventPublisher, NatsPublisher, NoopPublisher};
use opensase_storefront::repository::{AddressBook, CartRepository, CatalogRepository, MemoryStore, OrderRepository, PgStore};
use opensase_storefront::services::{CartLedger, OrderAssembler, OrderService};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct Backend {
    catalog: Arc<dyn CatalogRepository>,
    carts: Arc<dyn CartRepository>,
    addresses: Arc<dyn AddressBook>,
    orders: Arc<dyn OrderRepository>,
}

impl Backend {
    fn shared<S>(store: S) -> Self
    where
        S: CatalogRepository + CartRepository + AddressBook + OrderRepository + 'static,
    {
        let store = Arc::new(store);
        Self { catalog: store.clone(), carts: store.clone(), addresses: store.clone(), orders: store }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    let config = Config::from_env()?;

    let backend = match &config.database_url {
        Some(url) => {
            tracing::info!("using postgres backend");
            Backend::shared(PgStore::connect(url, config.database_max_connections).await?)
        }
        None => {
            let store = match &config.catalog_seed {
                Some(path) => MemoryStore::from_catalog_file(path)?,
                None => MemoryStore::new(),
            };
            tracing::warn!("DATABASE_URL not set, carts and orders are kept in memory");
            Backend::shared(store)
        }
    };

    let events: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => Arc::new(NatsPublisher::new(async_nats::connect(url.as_str()).await.with_context(|| format!("connecting to NATS at {url}"))?)),
        None => Arc::new(NoopPublisher),
    };

    let state = AppState {
        ledger: CartLedger::new(backend.catalog.clone(), backend.carts.clone(), config.ledger_queue_depth),
        assembler: Arc::new(OrderAssembler::new(backend.catalog, backend.addresses.clone(), backend.orders.clone(), events.clone(), config.tax_rate)),
        orders: OrderService::new(backend.orders, events).with_staff(config.staff_user_ids.clone()),
        addresses: backend.addresses,
    };

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("🚀 OpenSASE Storefront listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, router(state)).await?;
    Ok(())
}
