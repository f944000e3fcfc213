use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use delivery_server::catalog::{spawn_catalog_reload, AssetResolver, JsonFileVault, KeyVault};
use delivery_server::compute::ComputeExecutor;
use delivery_server::config::{generate_config_template, Config};
use delivery_server::content::{ContentRetriever, HttpGatewayClient};
use delivery_server::delivery::{DeliveryOutbox, Dispatcher, PurchasePipeline};
use delivery_server::ledger::{JsonRpcLedger, LedgerWatcher, LogFilter};
use delivery_server::{routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("delivery_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter()).init();
    }

    tracing::info!("Delivery server v{} starting", env!("CARGO_PKG_VERSION"));

    // Catalog / key vault
    let vault = Arc::new(JsonFileVault::open(config.catalog_path())?);
    if vault.len_hint() == Some(0) {
        tracing::warn!(
            "Catalog {} is empty; every request will be UNKNOWN_ASSET",
            vault.path().display()
        );
    }
    if config.catalog_reload_secs > 0 {
        spawn_catalog_reload(
            vault.clone(),
            std::time::Duration::from_secs(config.catalog_reload_secs),
        );
    }

    // Delivery pipeline
    let retrieval = config.retrieval();
    let compute = config.compute();
    let retriever = ContentRetriever::new(
        retrieval.gateways.clone(),
        Arc::new(HttpGatewayClient::new()?),
        retrieval.gateway_timeout(),
    );
    tracing::info!(
        "{} gateways configured, worst-case retrieval {}s",
        retriever.endpoints().len(),
        retriever.worst_case_latency().as_secs()
    );
    let executor = Arc::new(ComputeExecutor::with_builtins());
    if !executor.supports(&compute.default_algorithm) {
        tracing::warn!(
            "Default algorithm {:?} is not registered (available: {:?})",
            compute.default_algorithm,
            executor.algorithms()
        );
    }
    let dispatcher = Arc::new(Dispatcher::new(
        AssetResolver::new(vault),
        retriever,
        executor,
        compute.default_algorithm.clone(),
    ));

    let mut app_state = state::AppState::new(dispatcher.clone())
        .with_rate_limit(compute.rate_limit_per_minute, compute.rate_limit_burst);

    // Ledger watcher, only when a [ledger] section is configured
    let cancel = CancellationToken::new();
    let watcher_task = match &config.ledger {
        Some(ledger) => {
            let client = Arc::new(JsonRpcLedger::new(&ledger.rpc_url, ledger.request_timeout())?);
            let filter = LogFilter::for_signature(&ledger.contract_address, &ledger.event_signature);
            tracing::info!(
                "Purchase topic {} ({}) on {}",
                filter.topic,
                ledger.event_signature,
                ledger.rpc_url
            );
            let watcher = LedgerWatcher::new(client, filter, ledger.watcher_settings());
            app_state = app_state.with_watcher(watcher.subscribe());

            let pipeline = Arc::new(PurchasePipeline::new(
                dispatcher.clone(),
                Some(DeliveryOutbox::new(&config.data_dir)),
            ));
            Some(tokio::spawn(watcher.run(pipeline, cancel.clone())))
        }
        None => {
            tracing::info!("No [ledger] section configured, purchase watcher disabled");
            None
        }
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    let shutdown = cancel.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down");
        shutdown.cancel();
    })
    .await?;

    cancel.cancel();
    if let Some(task) = watcher_task {
        let _ = task.await;
    }

    Ok(())
}
