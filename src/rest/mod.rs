// rest/mod.rs — Public REST API server.
//
// Axum HTTP server bound to `{bind_address}:{port}` from the resolved config.
//
// Endpoints:
//   GET    /tasks
//   POST   /tasks
//   GET    /tasks/{id}
//   PUT    /tasks/{id}
//   DELETE /tasks/{id}
//   GET    /health

pub mod error;
pub mod routes;

use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("REST API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/health", get(routes::health::health))
        // Tasks
        .route(
            "/tasks",
            get(routes::tasks::list_tasks).post(routes::tasks::create_task),
        )
        .route(
            "/tasks/{id}",
            get(routes::tasks::read_task)
                .put(routes::tasks::update_task)
                .delete(routes::tasks::delete_task),
        )
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
