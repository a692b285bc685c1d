//! Notification fan-out.
//!
//! Business operations hand notifications to a bounded queue and return
//! immediately. A single background worker persists them in order; attached
//! emails go out on their own tasks so a slow mail relay never holds up the
//! queue. Nothing on this path can fail the triggering operation.

use chrono::Utc;
use service_core::error::AppError;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::{Notification, NotificationCategory, Order, VariantKey};
use crate::services::email::{EmailMessage, EmailSender};
use crate::services::metrics;
use crate::services::repository::NotificationRepository;

/// A notification waiting to be written, with an optional shopper email.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,
    pub link: Option<String>,
    pub email: Option<EmailMessage>,
}

impl NewNotification {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        category: NotificationCategory,
        link: Option<String>,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            category,
            link,
            email: None,
        }
    }

    pub fn low_stock(key: &VariantKey, remaining: i64) -> Self {
        Self::new(
            "Low stock",
            format!(
                "Product {} ({} / {}) is down to {} in stock",
                key.product_id, key.size, key.color, remaining
            ),
            NotificationCategory::Alert,
            Some(format!("/admin/products/{}", key.product_id)),
        )
    }

    pub fn new_order(order: &Order) -> Self {
        let mut notification = Self::new(
            "New order",
            format!(
                "Order {} placed for {} ({})",
                order.id, order.total_price, order.payment_method
            ),
            NotificationCategory::Order,
            Some(format!("/admin/orders/{}", order.id)),
        );
        notification.email = order.customer_email.as_ref().map(|to| EmailMessage {
            to: to.clone(),
            subject: format!("Order {} received", order.id),
            body: format!(
                "Thank you for your order. Total: {}. Payment method: {}.",
                order.total_price, order.payment_method
            ),
        });
        notification
    }

    pub fn payment_confirmed(order: &Order) -> Self {
        let mut notification = Self::new(
            "Payment confirmed",
            format!(
                "Payment of {} received for order {} via {}",
                order.total_price, order.id, order.payment_method
            ),
            NotificationCategory::Order,
            Some(format!("/admin/orders/{}", order.id)),
        );
        notification.email = order.customer_email.as_ref().map(|to| EmailMessage {
            to: to.clone(),
            subject: format!("Payment received for order {}", order.id),
            body: format!(
                "We have received your payment of {}. Your order is now being processed.",
                order.total_price
            ),
        });
        notification
    }
}

enum Command {
    Dispatch(NewNotification),
    Flush(oneshot::Sender<()>),
}

/// Cheap handle used by business services to emit notifications.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Command>,
}

impl Notifier {
    /// Start the background worker and return a handle to it.
    pub fn spawn(
        capacity: usize,
        repository: Arc<dyn NotificationRepository>,
        email: Arc<dyn EmailSender>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = NotificationWorker {
            rx,
            repository,
            email,
            email_slots: Arc::new(Semaphore::new(MAX_EMAILS_IN_FLIGHT)),
        };
        let handle = tokio::spawn(worker.run());
        (Self { tx }, handle)
    }

    /// Enqueue without waiting. A full or closed queue drops the notification.
    pub fn notify(&self, notification: NewNotification) {
        let title = notification.title.clone();
        match self.tx.try_send(Command::Dispatch(notification)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::record_notification_dropped("queue_full");
                tracing::warn!(title = %title, "Notification queue full, dropping notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                metrics::record_notification_dropped("closed");
                tracing::warn!(
                    title = %title,
                    "Notification worker stopped, dropping notification"
                );
            }
        }
    }

    /// Wait until everything enqueued before this call has been persisted.
    /// Emails may still be in flight.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

const MAX_EMAILS_IN_FLIGHT: usize = 32;

struct NotificationWorker {
    rx: mpsc::Receiver<Command>,
    repository: Arc<dyn NotificationRepository>,
    email: Arc<dyn EmailSender>,
    email_slots: Arc<Semaphore>,
}

impl NotificationWorker {
    async fn run(mut self) {
        tracing::info!("Notification worker started");
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Dispatch(notification) => self.dispatch(notification).await,
                Command::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        tracing::info!("Notification channel closed, worker exiting");
    }

    async fn dispatch(&self, notification: NewNotification) {
        let NewNotification {
            title,
            message,
            category,
            link,
            email,
        } = notification;

        let record = Notification {
            id: Uuid::new_v4().to_string(),
            title,
            message,
            category,
            link,
            is_read: false,
            created_at: Utc::now(),
        };

        if let Err(e) = self.repository.insert_notification(record.clone()).await {
            tracing::error!(
                error = %e,
                title = %record.title,
                category = %record.category,
                "Failed to persist notification"
            );
        }

        if let Some(email) = email {
            self.send_email(email);
        }
    }

    fn send_email(&self, email: EmailMessage) {
        let Ok(permit) = self.email_slots.clone().try_acquire_owned() else {
            metrics::record_notification_dropped("email_backlog");
            tracing::warn!(to = %email.to, "Too many emails in flight, dropping email");
            return;
        };
        let sender = self.email.clone();
        tokio::spawn(async move {
            if let Err(e) = sender.send(&email).await {
                tracing::warn!(error = %e, to = %email.to, "Failed to send email");
            }
            drop(permit);
        });
    }
}

/// Administrator view over stored notifications.
#[derive(Clone)]
pub struct NotificationInbox {
    repository: Arc<dyn NotificationRepository>,
    page_size: i64,
}

impl NotificationInbox {
    pub fn new(repository: Arc<dyn NotificationRepository>, page_size: i64) -> Self {
        Self {
            repository,
            page_size,
        }
    }

    /// Newest first, one page, plus the total unread count.
    pub async fn list(&self) -> Result<(Vec<Notification>, u64), AppError> {
        let notifications = self.repository.list_notifications(self.page_size).await?;
        let unread = self.repository.count_unread().await?;
        Ok((notifications, unread))
    }

    pub async fn mark_read(&self, id: &str) -> Result<(), AppError> {
        if !self.repository.mark_read(id).await? {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Notification {} not found",
                id
            )));
        }
        Ok(())
    }

    pub async fn mark_all_read(&self) -> Result<u64, AppError> {
        let updated = self.repository.mark_all_read().await?;
        tracing::debug!(updated, "Notifications marked read");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::email::{LogEmailSender, ProviderError};
    use crate::services::repository::MemoryStore;

    #[tokio::test]
    async fn notifications_are_persisted_after_flush() {
        let store = Arc::new(MemoryStore::new());
        let email = Arc::new(LogEmailSender::new());
        let (notifier, _handle) = Notifier::spawn(8, store.clone(), email.clone());

        notifier.notify(NewNotification::new(
            "Hello",
            "World",
            NotificationCategory::Other,
            None,
        ));
        notifier.flush().await;

        let listed = store.list_notifications(50).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Hello");
        assert!(!listed[0].is_read);
        assert_eq!(email.sent_count(), 0);
    }

    #[tokio::test]
    async fn inbox_marks_read() {
        let store = Arc::new(MemoryStore::new());
        let (notifier, _handle) =
            Notifier::spawn(8, store.clone(), Arc::new(LogEmailSender::new()));
        for title in ["one", "two"] {
            notifier.notify(NewNotification::new(title, "", NotificationCategory::Alert, None));
        }
        notifier.flush().await;

        let inbox = NotificationInbox::new(store.clone(), 50);
        let (listed, unread) = inbox.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(unread, 2);

        inbox.mark_read(&listed[0].id).await.unwrap();
        assert_eq!(inbox.list().await.unwrap().1, 1);
        assert_eq!(inbox.mark_all_read().await.unwrap(), 1);
        assert!(inbox.mark_read("missing").await.is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let notifier = Notifier { tx };

        notifier.notify(NewNotification::new("a", "a", NotificationCategory::Other, None));
        // The receiver never drains, so the second send must return immediately.
        notifier.notify(NewNotification::new("b", "b", NotificationCategory::Other, None));
    }

    struct StalledEmailSender;

    #[async_trait::async_trait]
    impl EmailSender for StalledEmailSender {
        async fn send(&self, _email: &EmailMessage) -> Result<(), ProviderError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn stalled_email_does_not_hold_up_persistence() {
        let store = Arc::new(MemoryStore::new());
        let (notifier, _handle) = Notifier::spawn(4, store.clone(), Arc::new(StalledEmailSender));

        for i in 0..10 {
            let mut notification =
                NewNotification::new(format!("n{}", i), "", NotificationCategory::Order, None);
            notification.email = Some(EmailMessage {
                to: "shopper@example.com".to_string(),
                subject: "Order".to_string(),
                body: String::new(),
            });
            notifier.notify(notification);
            notifier.flush().await;
        }

        assert_eq!(store.list_notifications(50).await.unwrap().len(), 10);
    }
}
