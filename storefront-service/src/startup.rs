//! Application startup and lifecycle management.

use axum::middleware::from_fn;
use axum::{
    routing::{get, patch, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    tracing::{make_request_span, request_id_middleware},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::{Config, StorageConfig};
use crate::handlers;
use crate::services::{
    CouponEvaluator, EmailSender, FlatRateShipping, InventoryLedger, LogEmailSender,
    NotificationInbox, Notifier, OrderService, PaymentReconciler, Repositories, ReturnService,
    ShippingProvider, SmtpEmailSender,
};
use crate::services::gateways::{EsewaClient, KhaltiClient};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub repositories: Repositories,
    pub orders: OrderService,
    pub coupons: CouponEvaluator,
    pub payments: PaymentReconciler,
    pub returns: ReturnService,
    pub inbox: NotificationInbox,
    pub notifier: Notifier,
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    notification_worker: JoinHandle<()>,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let repositories = match &config.storage {
            StorageConfig::Memory => {
                tracing::warn!("Using in-memory storage; data is lost on restart");
                Repositories::memory()
            }
            StorageConfig::Mongo(database) => {
                let mut client_options = ClientOptions::parse(database.url.expose_secret())
                    .await
                    .map_err(|e| {
                        tracing::error!("Failed to parse MongoDB connection string: {}", e);
                        AppError::DatabaseError(e.into())
                    })?;
                client_options.app_name = Some(config.service_name.clone());

                let client = Client::with_options(client_options).map_err(|e| {
                    tracing::error!("Failed to create MongoDB client: {}", e);
                    AppError::DatabaseError(e.into())
                })?;
                Repositories::mongo(&client.database(&database.db_name))
                    .await
                    .map_err(|e| {
                        tracing::error!("Failed to initialize database indexes: {}", e);
                        e
                    })?
            }
        };

        let email: Arc<dyn EmailSender> = if config.smtp.enabled {
            let sender = SmtpEmailSender::new(&config.smtp).map_err(|e| {
                tracing::error!("Failed to configure SMTP transport: {}", e);
                AppError::ConfigError(anyhow::anyhow!("SMTP: {}", e))
            })?;
            tracing::info!(host = %config.smtp.host, "SMTP email delivery enabled");
            Arc::new(sender)
        } else {
            tracing::warn!("SMTP disabled - customer emails will only be logged");
            Arc::new(LogEmailSender::new())
        };

        let (notifier, notification_worker) = Notifier::spawn(
            config.notifications.queue_capacity,
            repositories.notifications.clone(),
            email,
        );

        let inventory = InventoryLedger::new(
            repositories.products.clone(),
            notifier.clone(),
            config.inventory.low_stock_threshold,
        );
        let coupons =
            CouponEvaluator::new(repositories.coupons.clone(), repositories.orders.clone());
        let shipping: Arc<dyn ShippingProvider> =
            Arc::new(FlatRateShipping::new(config.shipping.clone()));

        let orders = OrderService::new(
            repositories.products.clone(),
            repositories.orders.clone(),
            inventory,
            coupons.clone(),
            shipping,
            notifier.clone(),
        );

        let esewa = EsewaClient::new(config.esewa.clone())?;
        if !config.esewa.verify_with_lookup {
            tracing::warn!("eSewa status lookup disabled - callbacks trusted on signature alone");
        }
        let khalti = KhaltiClient::new(config.khalti.clone())?;
        if config.khalti.secret_key.expose_secret().is_empty() {
            tracing::warn!("Khalti secret key not configured - Khalti payments will fail");
        }

        let payments = PaymentReconciler::new(
            repositories.orders.clone(),
            notifier.clone(),
            esewa,
            khalti,
            config.public_url.clone(),
            config.frontend_url.clone(),
        );
        let returns = ReturnService::new(
            repositories.orders.clone(),
            repositories.returns.clone(),
            notifier.clone(),
        );
        let inbox = NotificationInbox::new(
            repositories.notifications.clone(),
            config.notifications.page_size,
        );

        let state = AppState {
            config: config.clone(),
            repositories,
            orders,
            coupons,
            payments,
            returns,
            inbox,
            notifier,
        };

        // Port 0 picks a random port (tests).
        let address = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", address, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Storefront service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
            notification_worker,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the application state.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = router(self.state);

        let result = axum::serve(self.listener, router).await;
        self.notification_worker.abort();
        if let Err(e) = result {
            tracing::error!("HTTP server error: {}", e);
            return Err(std::io::Error::other(format!("HTTP server error: {}", e)));
        }
        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/products", post(handlers::products::create_product))
        .route("/coupons", post(handlers::coupons::create_coupon))
        .route("/orders", get(handlers::admin::list_orders))
        .route(
            "/orders/:id/status",
            patch(handlers::admin::update_order_status),
        )
        .route("/orders/:id/label", post(handlers::admin::issue_label))
        .route("/returns/:id", patch(handlers::returns::review_return))
        .route("/notifications", get(handlers::admin::list_notifications))
        .route(
            "/notifications/read-all",
            patch(handlers::admin::mark_all_notifications_read),
        )
        .route(
            "/notifications/:id/read",
            patch(handlers::admin::mark_notification_read),
        );

    let payments = Router::new()
        .route("/esewa/initiate", post(handlers::payments::esewa_initiate))
        .route("/esewa/callback", get(handlers::payments::esewa_callback))
        .route("/khalti/initiate", post(handlers::payments::khalti_initiate))
        .route("/khalti/callback", get(handlers::payments::khalti_callback))
        .route("/khalti/verify", post(handlers::payments::khalti_verify));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/products/:id", get(handlers::products::get_product))
        .route("/coupons/validate", post(handlers::coupons::validate_coupon))
        .route("/orders", post(handlers::orders::place_order))
        .route("/orders/mine", get(handlers::orders::my_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/returns",
            post(handlers::returns::create_return).get(handlers::returns::list_returns),
        )
        .nest("/payments", payments)
        .nest("/admin", admin)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}
