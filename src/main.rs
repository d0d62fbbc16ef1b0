use std::process;
use std::sync::Arc;

use piazza::application::error::AppError;
use piazza::application::flash_sale::FlashSaleService;
use piazza::application::repos::{OrdersRepo, ShopsRepo, VouchersRepo};
use piazza::application::shops::ShopService;
use piazza::application::worker::{OrderWorker, WorkerConfig};
use piazza::cache::{CacheClient, CacheConfig};
use piazza::config;
use piazza::infra::db::PostgresRepositories;
use piazza::infra::error::InfraError;
use piazza::infra::http::{self, HttpState};
use piazza::infra::ids::IdGenerator;
use piazza::infra::store::{MemoryStore, SharedStore};
use piazza::infra::telemetry;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(config::ServeArgs::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;

    // The shared store: one per process; a networked deployment swaps in a
    // remote implementation of the same trait here.
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());

    let cache = CacheClient::new(store.clone(), CacheConfig::from(&settings.cache));
    let ids = IdGenerator::new(store.clone());

    let shops_repo: Arc<dyn ShopsRepo> = repositories.clone();
    let vouchers_repo: Arc<dyn VouchersRepo> = repositories.clone();
    let orders_repo: Arc<dyn OrdersRepo> = repositories.clone();

    let shop_service = ShopService::new(cache.clone(), shops_repo);
    let flash_sale_service =
        FlashSaleService::new(store.clone(), cache, ids, vouchers_repo.clone());

    let worker_handle = if settings.worker.enabled {
        let worker = OrderWorker::new(
            store.clone(),
            vouchers_repo,
            orders_repo,
            WorkerConfig::from(&settings.worker),
        );
        worker.prepare().await.map_err(AppError::from)?;
        Some(tokio::spawn(worker.run()))
    } else {
        info!("Order worker disabled by configuration");
        None
    };

    let router = http::build_router(HttpState {
        shops: shop_service,
        flash_sale: flash_sale_service,
    });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "Piazza listening");

    let result = axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")));

    if let Some(handle) = worker_handle {
        handle.abort();
        let _ = handle.await;
    }

    result
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    repositories
        .health_check()
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    info!("Migrations applied");
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool =
        PostgresRepositories::connect(database_url, settings.database.max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}
