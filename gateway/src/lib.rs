pub mod admin;
pub mod aggregate;
pub mod breaker;
pub mod client;
pub mod config;
pub mod errors;
pub mod limiter;
pub mod metrics_defs;
pub mod principal;
pub mod proxy;
pub mod routes;
pub mod service;

#[cfg(test)]
mod testutils;

pub use errors::{GatewayError, Result};

use shared::http::run_http_service;

/// Runs the gateway and admin listeners until one of them fails.
pub async fn run(config: config::Config) -> Result<()> {
    let gateway_service = service::GatewayService::new(&config)?;

    let gateway_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        gateway_service,
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin::AdminService::new(),
    );

    tokio::try_join!(gateway_task, admin_task)?;
    Ok(())
}
