use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use balance_api::{config::Config, handlers};
use dotenv::dotenv;
use ledger_core::metrics::Metrics;
use ledger_core::rates::{RateProvider, RateTable};
use ledger_core::{Ledger, Store, StoreConfig};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = Config::from_env().expect("Failed to load configuration");
    config.validate().expect("Invalid configuration");

    info!("Starting balance API on port {}", config.server.port);

    let store = Store::connect(&StoreConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        acquire_timeout_secs: config.database.acquire_timeout_secs,
    })
    .await
    .expect("Failed to connect to database");

    let table = match &config.rates.file {
        Some(path) => {
            let data = std::fs::read_to_string(path).expect("Failed to read rates file");
            RateTable::from_json(&data).expect("Failed to parse rates file")
        }
        None => RateTable::stub(),
    };
    info!("Rate table loaded, base currency {}", table.base_currency());

    let metrics = Metrics::new().expect("Failed to initialize metrics");
    let ledger = Arc::new(Ledger::new(store, RateProvider::new(table)).with_metrics(metrics));

    if config.server.api_key.is_some() {
        info!("Write operations require an access key");
    }

    let api_key = config.server.api_key.clone();
    HttpServer::new(move || {
        let api_key = api_key.clone();

        App::new()
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(web::Data::new(ledger.clone()))
            .configure(move |cfg| handlers::configure_routes(cfg, api_key))
    })
    .workers(config.server.workers)
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}
