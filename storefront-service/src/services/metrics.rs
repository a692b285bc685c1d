use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder. Call once from `main`.
pub fn init_metrics() -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    METRICS_HANDLE
        .set(handle)
        .map_err(|_| anyhow::anyhow!("metrics handle already initialized"))?;

    metrics::describe_counter!(
        "storefront_orders_placed_total",
        "Orders created, by payment method"
    );
    metrics::describe_counter!(
        "storefront_orders_rejected_total",
        "Checkout attempts rejected, by reason"
    );
    metrics::describe_counter!(
        "storefront_payments_confirmed_total",
        "Orders transitioned to paid, by gateway"
    );
    metrics::describe_counter!(
        "storefront_payment_verification_failures_total",
        "Gateway confirmations that could not be verified"
    );
    metrics::describe_counter!(
        "storefront_low_stock_alerts_total",
        "Reservations that left a variant at or below the low-stock threshold"
    );
    metrics::describe_counter!(
        "storefront_notifications_dropped_total",
        "Notifications discarded before reaching the worker"
    );

    Ok(())
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_order_placed(payment_method: &str) {
    metrics::counter!(
        "storefront_orders_placed_total",
        "payment_method" => payment_method.to_string()
    )
    .increment(1);
}

pub fn record_order_rejected(reason: &'static str) {
    metrics::counter!("storefront_orders_rejected_total", "reason" => reason).increment(1);
}

pub fn record_payment_confirmed(gateway: &'static str) {
    metrics::counter!("storefront_payments_confirmed_total", "gateway" => gateway).increment(1);
}

pub fn record_verification_failure(gateway: &'static str) {
    metrics::counter!(
        "storefront_payment_verification_failures_total",
        "gateway" => gateway
    )
    .increment(1);
}

pub fn record_low_stock_alert() {
    metrics::counter!("storefront_low_stock_alerts_total").increment(1);
}

pub fn record_notification_dropped(reason: &'static str) {
    metrics::counter!("storefront_notifications_dropped_total", "reason" => reason).increment(1);
}
