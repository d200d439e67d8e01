//! HTTP server hosting rate-limited routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::{RouteLimit, SlidegateConfig};
use crate::error::{Result, SlidegateError};
use crate::ratelimit::Limiter;
use crate::store::{RedisStore, RedisStoreConfig};

/// Mount every configured route behind its own admission layer.
///
/// Each route answers `GET` with its configured body.
pub fn build_router(limiter: &Limiter, routes: &[RouteLimit], trust_forwarded: bool) -> Router {
    routes.iter().fold(Router::new(), |router, route| {
        let body = route.body.clone();
        let layer = limiter
            .limit_layer(route.max_calls, route.window())
            .trust_forwarded_for(trust_forwarded);

        info!(
            path = %route.path,
            max_calls = route.max_calls,
            window_secs = route.window_secs,
            "Mounting rate-limited route"
        );

        router.route(
            &route.path,
            get(move || {
                let body = body.clone();
                async move { body }
            })
            .layer(layer),
        )
    })
}

/// HTTP server for rate-limited routes.
pub struct GatewayServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Routes to serve
    router: Router,
}

impl GatewayServer {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Connect to the configured Redis and mount the configured routes.
    ///
    /// Fails if the store cannot be reached, so a misconfigured gateway
    /// never starts serving.
    pub async fn from_config(config: &SlidegateConfig) -> Result<Self> {
        let store = RedisStore::connect_with_config(
            &config.store.redis_url,
            RedisStoreConfig {
                key_prefix: config.store.key_prefix.clone(),
            },
        )
        .await?;
        store.ping().await?;
        info!("Attempt store reachable");

        let limiter = Limiter::new(Arc::new(store));
        let router = build_router(&limiter, &config.routes, config.server.trust_forwarded_for);
        Ok(Self::new(config.server.listen_addr, router))
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    ///
    /// Connection addresses are attached to every request, which the
    /// admission layer needs to key clients.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;

        info!(
            addr = %listener.local_addr()?,
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            SlidegateError::Server(e.to_string())
        })
    }
}
