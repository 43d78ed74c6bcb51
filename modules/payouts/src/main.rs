use event_bus::{EventBus, InMemoryBus, NatsBus};
use mutation_kernel::{BusConsumer, Consumer, Kernel};
use payouts_rs::config::{BusType, Config};
use payouts_rs::{handlers, router, AppState, InMemoryPayoutStore, PayoutService, PayoutStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().unwrap_or_else(|err| {
        eprintln!("Configuration error: {}", err);
        std::process::exit(1);
    });

    tracing::info!(
        service = %config.kernel.service_name,
        bus_type = ?config.bus_type,
        "Starting payouts service"
    );

    // Create event bus
    let bus: Arc<dyn EventBus> = match config.bus_type {
        BusType::InMemory => {
            tracing::info!("Using InMemory event bus");
            Arc::new(InMemoryBus::new())
        }
        BusType::Nats => {
            let nats_url = config
                .nats_url
                .clone()
                .unwrap_or_else(|| "nats://localhost:4222".to_string());
            tracing::info!("Connecting to NATS at {}", nats_url);
            Arc::new(
                NatsBus::connect(&nats_url)
                    .await
                    .expect("Failed to connect to NATS"),
            )
        }
    };

    let kernel = Kernel::builder(config.kernel.clone()).bus(bus.clone()).build();
    let store: Arc<dyn PayoutStore> = Arc::new(InMemoryPayoutStore::new());

    let consumer: Arc<dyn Consumer> = Arc::new(
        BusConsumer::subscribe(
            bus.as_ref(),
            &config.inbound_subject,
            config.kernel.consumer_poll_interval,
        )
        .await
        .expect("Failed to subscribe to inbound events"),
    );
    let runtime = kernel.start(Some((handlers(&kernel, store.clone()), consumer)));

    let state = AppState {
        service: Arc::new(PayoutService::new(&kernel, store)),
    };
    let app = router(state).layer(
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("HOST and PORT must form a valid address");
    tracing::info!("Payouts service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server failed to start");

    runtime.shutdown().await;
}
