pub mod coupon;
pub mod notification;
pub mod order;
pub mod principal;
pub mod product;
pub mod return_request;

pub use coupon::{Coupon, DiscountType};
pub use notification::{Notification, NotificationCategory};
pub use order::{
    LineItem, Order, OrderStatus, PaymentMethod, PaymentResult, ShippingAddress, ShippingLabel,
};
pub use principal::Principal;
pub use product::{Product, Variant, VariantKey};
pub use return_request::{ReturnItem, ReturnRequest, ReturnStatus};

/// `Option<DateTime<Utc>>` stored as a BSON date so it sorts by time.
pub(crate) mod optional_bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value.map(bson::DateTime::from_chrono).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Ok(Option::<bson::DateTime>::deserialize(deserializer)?.map(|d| d.to_chrono()))
    }
}
