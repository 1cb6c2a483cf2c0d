//! Minimal HTTP surface: health probe and the push receiver.

pub mod error;
pub mod routes;

use std::net::SocketAddr;

use actix_web::dev::Server;
use actix_web::{App, HttpServer, web};
use tracing::info;

pub use error::AppError;

use crate::engine::Engine;

/// Bind the server. Signals are left to the caller, which stops it through the server handle.
pub fn bind_server(addr: SocketAddr, engine: web::Data<Engine>) -> Result<Server, AppError> {
    let server = HttpServer::new(move || App::new().app_data(engine.clone()).configure(routes::routes))
        .disable_signals()
        .bind(addr)?
        .run();

    info!(%addr, "HTTP server listening");
    Ok(server)
}
