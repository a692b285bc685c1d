use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, DateTime as BsonDateTime};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument,
};
use mongodb::{Collection, Database, IndexModel};
use rust_decimal::Decimal;
use service_core::error::AppError;

use super::{
    CouponRepository, NotificationRepository, OrderRepository, ProductRepository,
    ReturnRepository, StockUpdate,
};
use crate::models::{
    Coupon, Notification, Order, OrderStatus, PaymentMethod, PaymentResult, Product,
    ReturnRequest, ReturnStatus, ShippingLabel, VariantKey,
};

const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct MongoStore {
    products: Collection<Product>,
    coupons: Collection<Coupon>,
    orders: Collection<Order>,
    returns: Collection<ReturnRequest>,
    notifications: Collection<Notification>,
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            products: db.collection("products"),
            coupons: db.collection("coupons"),
            orders: db.collection("orders"),
            returns: db.collection("returns"),
            notifications: db.collection("notifications"),
        }
    }

    pub async fn init_indexes(&self) -> Result<(), AppError> {
        let coupon_code_index = IndexModel::builder()
            .keys(doc! { "code": 1 })
            .options(
                IndexOptions::builder()
                    .name("coupon_code_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.coupons.create_index(coupon_code_index, None).await?;

        let user_order_index = IndexModel::builder()
            .keys(doc! { "user_id": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("user_order_idx".to_string())
                    .build(),
            )
            .build();

        // Coupon usage is derived by counting orders, so this query is hot at checkout.
        let coupon_usage_index = IndexModel::builder()
            .keys(doc! { "coupon_code": 1, "user_id": 1, "status": 1 })
            .options(
                IndexOptions::builder()
                    .name("coupon_usage_idx".to_string())
                    .sparse(true)
                    .build(),
            )
            .build();

        self.orders
            .create_indexes([user_order_index, coupon_usage_index], None)
            .await?;

        let return_order_index = IndexModel::builder()
            .keys(doc! { "order_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("return_order_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.returns.create_index(return_order_index, None).await?;

        let notification_created_index = IndexModel::builder()
            .keys(doc! { "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("notification_created_idx".to_string())
                    .build(),
            )
            .build();
        self.notifications
            .create_index(notification_created_index, None)
            .await?;

        tracing::info!("Storefront indexes initialized");
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl ProductRepository for MongoStore {
    async fn insert_product(&self, product: Product) -> Result<(), AppError> {
        self.products.insert_one(product, None).await?;
        Ok(())
    }

    async fn get_product(&self, id: &str) -> Result<Option<Product>, AppError> {
        Ok(self.products.find_one(doc! { "_id": id }, None).await?)
    }

    async fn decrement_stock(
        &self,
        key: &VariantKey,
        quantity: i64,
    ) -> Result<StockUpdate, AppError> {
        // The precondition lives in the filter, so the check and the $inc are
        // a single document-level atomic operation.
        let filter = doc! {
            "_id": key.product_id.as_str(),
            "variants": {
                "$elemMatch": {
                    "size": key.size.as_str(),
                    "color": key.color.as_str(),
                    "stock": { "$gte": quantity },
                }
            },
        };
        let update = doc! { "$inc": { "variants.$.stock": -quantity } };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        if let Some(product) = self
            .products
            .find_one_and_update(filter, update, options)
            .await?
        {
            let remaining = product
                .variant(&key.size, &key.color)
                .map(|v| v.stock)
                .unwrap_or(0);
            return Ok(StockUpdate::Applied { remaining });
        }

        let variant = self
            .get_product(&key.product_id)
            .await?
            .and_then(|p| p.variant(&key.size, &key.color).cloned());

        Ok(match variant {
            Some(v) => StockUpdate::Insufficient { available: v.stock },
            None => StockUpdate::VariantNotFound,
        })
    }

    async fn increment_stock(&self, key: &VariantKey, quantity: i64) -> Result<(), AppError> {
        let filter = doc! {
            "_id": key.product_id.as_str(),
            "variants": {
                "$elemMatch": { "size": key.size.as_str(), "color": key.color.as_str() }
            },
        };
        let update = doc! { "$inc": { "variants.$.stock": quantity } };

        let result = self.products.update_one(filter, update, None).await?;
        if result.matched_count == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Variant {} not found",
                key
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CouponRepository for MongoStore {
    async fn insert_coupon(&self, coupon: Coupon) -> Result<(), AppError> {
        let code = coupon.code.clone();
        self.coupons.insert_one(coupon, None).await.map_err(|e| {
            if is_duplicate_key(&e) {
                AppError::Conflict(anyhow::anyhow!("Coupon {} already exists", code))
            } else {
                AppError::from(e)
            }
        })?;
        Ok(())
    }

    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>, AppError> {
        Ok(self.coupons.find_one(doc! { "code": code }, None).await?)
    }
}

#[async_trait]
impl OrderRepository for MongoStore {
    async fn insert_order(&self, order: Order) -> Result<(), AppError> {
        self.orders.insert_one(order, None).await?;
        Ok(())
    }

    async fn get_order(&self, id: &str) -> Result<Option<Order>, AppError> {
        Ok(self.orders.find_one(doc! { "_id": id }, None).await?)
    }

    async fn list_orders_for_user(&self, user_id: &str) -> Result<Vec<Order>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        let cursor = self
            .orders
            .find(doc! { "user_id": user_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn list_orders(&self, limit: i64) -> Result<Vec<Order>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .limit(limit)
            .build();
        let cursor = self.orders.find(doc! {}, options).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn count_coupon_uses(&self, code: &str, user_id: Option<&str>) -> Result<u64, AppError> {
        let mut filter = doc! {
            "coupon_code": code,
            "status": { "$ne": to_bson(&OrderStatus::Cancelled)? },
        };
        if let Some(uid) = user_id {
            filter.insert("user_id", uid);
        }
        Ok(self.orders.count_documents(filter, None).await?)
    }

    async fn mark_paid(
        &self,
        id: &str,
        result: PaymentResult,
        paid_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let filter = doc! {
            "_id": id,
            "is_paid": false,
            "status": {
                "$in": [
                    to_bson(&OrderStatus::Pending)?,
                    to_bson(&OrderStatus::Processing)?,
                ]
            },
        };
        let update = doc! {
            "$set": {
                "is_paid": true,
                "paid_at": BsonDateTime::from_chrono(paid_at),
                "status": to_bson(&OrderStatus::Processing)?,
                "payment_result": to_bson(&result)?,
                "updated_at": BsonDateTime::from_chrono(paid_at),
            }
        };

        let outcome = self.orders.update_one(filter, update, None).await?;
        Ok(outcome.modified_count == 1)
    }

    async fn transition_status(
        &self,
        id: &str,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let filter = doc! { "_id": id, "status": to_bson(&from)? };
        let mut set = doc! {
            "status": to_bson(&to)?,
            "updated_at": BsonDateTime::from_chrono(at),
        };
        if to == OrderStatus::Delivered {
            set.insert("is_delivered", true);
            set.insert("delivered_at", BsonDateTime::from_chrono(at));
        }

        let outcome = self
            .orders
            .update_one(filter, doc! { "$set": set }, None)
            .await?;
        if outcome.modified_count != 1 {
            return Ok(false);
        }

        if to == OrderStatus::Delivered {
            let cod_filter = doc! {
                "_id": id,
                "is_paid": false,
                "payment_method": to_bson(&PaymentMethod::CashOnDelivery)?,
            };
            let settle = doc! {
                "$set": { "is_paid": true, "paid_at": BsonDateTime::from_chrono(at) }
            };
            self.orders.update_one(cod_filter, settle, None).await?;
        }

        Ok(true)
    }

    async fn set_shipping_label(&self, id: &str, label: ShippingLabel) -> Result<bool, AppError> {
        let update = doc! {
            "$set": {
                "shipping_label": to_bson(&label)?,
                "updated_at": BsonDateTime::now(),
            }
        };
        let outcome = self
            .orders
            .update_one(doc! { "_id": id }, update, None)
            .await?;
        Ok(outcome.matched_count == 1)
    }

    async fn set_payment_reference(&self, id: &str, reference: &str) -> Result<bool, AppError> {
        let update = doc! {
            "$set": {
                "payment_reference": reference,
                "updated_at": BsonDateTime::now(),
            }
        };
        let outcome = self
            .orders
            .update_one(doc! { "_id": id, "is_paid": false }, update, None)
            .await?;
        Ok(outcome.matched_count == 1)
    }
}

#[async_trait]
impl ReturnRepository for MongoStore {
    async fn insert_return(&self, request: ReturnRequest) -> Result<bool, AppError> {
        match self.returns.insert_one(request, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_return(&self, id: &str) -> Result<Option<ReturnRequest>, AppError> {
        Ok(self.returns.find_one(doc! { "_id": id }, None).await?)
    }

    async fn find_return_for_order(
        &self,
        order_id: &str,
    ) -> Result<Option<ReturnRequest>, AppError> {
        Ok(self
            .returns
            .find_one(doc! { "order_id": order_id }, None)
            .await?)
    }

    async fn list_returns(&self, user_id: Option<&str>) -> Result<Vec<ReturnRequest>, AppError> {
        let filter = match user_id {
            Some(uid) => doc! { "user_id": uid },
            None => doc! {},
        };
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        let cursor = self.returns.find(filter, options).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update_return(
        &self,
        id: &str,
        from: ReturnStatus,
        to: ReturnStatus,
        refund_amount: Decimal,
        admin_note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let filter = doc! { "_id": id, "status": to_bson(&from)? };
        let mut set = doc! {
            "status": to_bson(&to)?,
            "refund_amount": to_bson(&refund_amount)?,
            "updated_at": BsonDateTime::from_chrono(at),
        };
        if let Some(note) = admin_note {
            set.insert("admin_note", note);
        }

        let outcome = self
            .returns
            .update_one(filter, doc! { "$set": set }, None)
            .await?;
        Ok(outcome.modified_count == 1)
    }
}

#[async_trait]
impl NotificationRepository for MongoStore {
    async fn insert_notification(&self, notification: Notification) -> Result<(), AppError> {
        self.notifications.insert_one(notification, None).await?;
        Ok(())
    }

    async fn list_notifications(&self, limit: i64) -> Result<Vec<Notification>, AppError> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .limit(limit)
            .build();
        let cursor = self.notifications.find(doc! {}, options).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn count_unread(&self) -> Result<u64, AppError> {
        Ok(self
            .notifications
            .count_documents(doc! { "is_read": false }, None)
            .await?)
    }

    async fn mark_read(&self, id: &str) -> Result<bool, AppError> {
        let outcome = self
            .notifications
            .update_one(doc! { "_id": id }, doc! { "$set": { "is_read": true } }, None)
            .await?;
        Ok(outcome.matched_count == 1)
    }

    async fn mark_all_read(&self) -> Result<u64, AppError> {
        let outcome = self
            .notifications
            .update_many(
                doc! { "is_read": false },
                doc! { "$set": { "is_read": true } },
                None,
            )
            .await?;
        Ok(outcome.modified_count)
    }
}
