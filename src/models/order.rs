use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::validation::{validate_alpha, validate_numeric, validate_phone};

// ============================================================================
// Order Aggregate
// ============================================================================
//
// Wire schema of the orders topic. Field names are fixed by the producers.
//
//   Order
//   ├── Delivery   (exactly one)
//   ├── Payment    (exactly one)
//   └── Item[]     (at least one)
//
// Numeric fields are plain integers: a payload that omits one fails to
// decode instead of silently defaulting to zero.
//
// ============================================================================

#[derive(Serialize, Deserialize, Validate, Clone, Debug, PartialEq)]
pub struct Order {
    /// Unique order identifier, primary key of the `orders` table
    #[validate(length(min = 1))]
    pub order_uid: String,
    #[validate(length(min = 1))]
    pub track_number: String,
    #[validate(length(min = 1))]
    pub entry: String,
    #[validate(nested)]
    pub delivery: Delivery,
    #[validate(nested)]
    pub payment: Payment,
    #[validate(length(min = 1), nested)]
    pub items: Vec<Item>,
    #[validate(custom(function = "validate_alpha"))]
    pub locale: String,
    #[serde(default)]
    pub internal_signature: String,
    #[validate(length(min = 1))]
    pub customer_id: String,
    #[validate(length(min = 1))]
    pub delivery_service: String,
    #[validate(custom(function = "validate_numeric"))]
    pub shardkey: String,
    #[validate(range(min = 0))]
    pub sm_id: i32,
    pub date_created: DateTime<Utc>,
    #[validate(custom(function = "validate_numeric"))]
    pub oof_shard: String,
}

/// Recipient contact and address.
#[derive(Serialize, Deserialize, Validate, Clone, Debug, PartialEq)]
pub struct Delivery {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(custom(function = "validate_phone"))]
    pub phone: String,
    #[validate(custom(function = "validate_numeric"))]
    pub zip: String,
    #[validate(length(min = 1))]
    pub city: String,
    #[validate(length(min = 1))]
    pub address: String,
    #[validate(length(min = 1))]
    pub region: String,
    #[validate(email)]
    pub email: String,
}

#[derive(Serialize, Deserialize, Validate, Clone, Debug, PartialEq)]
pub struct Payment {
    #[validate(length(min = 1))]
    pub transaction: String,
    #[serde(default)]
    pub request_id: String,
    #[validate(custom(function = "validate_alpha"))]
    pub currency: String,
    #[validate(length(min = 1))]
    pub provider: String,
    #[validate(range(min = 0))]
    pub amount: i32,
    /// Unix seconds
    #[validate(range(min = 1))]
    pub payment_dt: i64,
    #[validate(length(min = 1))]
    pub bank: String,
    #[validate(range(min = 0))]
    pub delivery_cost: i32,
    #[validate(range(min = 0))]
    pub goods_total: i32,
    #[validate(range(min = 0))]
    pub custom_fee: i32,
}

#[derive(Serialize, Deserialize, Validate, Clone, Debug, PartialEq)]
pub struct Item {
    #[validate(range(min = 1))]
    pub chrt_id: i64,
    #[validate(length(min = 1))]
    pub track_number: String,
    #[validate(range(min = 0))]
    pub price: i32,
    #[validate(length(min = 1))]
    pub rid: String,
    #[validate(length(min = 1))]
    pub name: String,
    /// Discount in percent
    #[validate(range(min = 0, max = 100))]
    pub sale: i32,
    #[validate(length(min = 1))]
    pub size: String,
    #[validate(range(min = 0))]
    pub total_price: i32,
    pub nm_id: i64,
    #[validate(length(min = 1))]
    pub brand: String,
    pub status: i32,
}

// ============================================================================
// Unit Tests
// ============================================================================
