pub mod coupon;
pub mod email;
pub mod gateways;
pub mod inventory;
pub mod metrics;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod repository;
pub mod returns;
pub mod shipping;

pub use coupon::CouponEvaluator;
pub use email::{EmailSender, LogEmailSender, SmtpEmailSender};
pub use inventory::InventoryLedger;
pub use metrics::{get_metrics, init_metrics};
pub use notifications::{NotificationInbox, Notifier};
pub use orders::OrderService;
pub use payments::PaymentReconciler;
pub use repository::Repositories;
pub use returns::ReturnService;
pub use shipping::{FlatRateShipping, ShippingProvider};
