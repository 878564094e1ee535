//! Typed rows for the catalog, subscription and order tables.
//!
//! Every struct maps one table row; [`FromRow`] pulls the fields out of an
//! executor [`Row`] by column name. Nothing here performs I/O.

use crate::executor::{Row, StoreError};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Build a typed value from an executor row.
pub trait FromRow: Sized {
    /// # Errors
    ///
    /// Returns `StoreError::ParseError` when a column is missing or holds an
    /// unexpected type.
    fn from_row(row: &Row) -> Result<Self, StoreError>;

    fn from_rows(rows: &[Row]) -> Result<Vec<Self>, StoreError> {
        rows.iter().map(Self::from_row).collect()
    }
}

/// Which child list a category link populates on its location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryType {
    /// Categories carrying plans (and items)
    Location,
    /// Categories carrying items only
    Item,
}

impl CategoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryType::Location => "location",
            CategoryType::Item => "item",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "location" => Ok(CategoryType::Location),
            "item" => Ok(CategoryType::Item),
            other => Err(StoreError::ParseError(format!(
                "unknown category type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for CategoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a redeemed item is handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentMode {
    Takeaway,
    DineIn,
    Delivery,
}

impl FulfillmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentMode::Takeaway => "TAKEAWAY",
            FulfillmentMode::DineIn => "DINE_IN",
            FulfillmentMode::Delivery => "DELIVERY",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "TAKEAWAY" => Ok(FulfillmentMode::Takeaway),
            "DINE_IN" => Ok(FulfillmentMode::DineIn),
            "DELIVERY" => Ok(FulfillmentMode::Delivery),
            other => Err(StoreError::ParseError(format!(
                "unknown fulfillment mode '{other}'"
            ))),
        }
    }
}

/// Consumption order lifecycle. Only `Pending` is written here; the rest
/// belong to the fulfillment workflow, which may also use statuses of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumptionStatus {
    Pending,
    Preparing,
    Ready,
    Completed,
    Cancelled,
    /// Any other stored value, kept verbatim
    #[serde(untagged)]
    Other(String),
}

impl ConsumptionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ConsumptionStatus::Pending => "PENDING",
            ConsumptionStatus::Preparing => "PREPARING",
            ConsumptionStatus::Ready => "READY",
            ConsumptionStatus::Completed => "COMPLETED",
            ConsumptionStatus::Cancelled => "CANCELLED",
            ConsumptionStatus::Other(status) => status,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "PENDING" => ConsumptionStatus::Pending,
            "PREPARING" => ConsumptionStatus::Preparing,
            "READY" => ConsumptionStatus::Ready,
            "COMPLETED" => ConsumptionStatus::Completed,
            "CANCELLED" => ConsumptionStatus::Cancelled,
            other => ConsumptionStatus::Other(other.to_string()),
        }
    }
}

/// Point-of-sale order lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Processing,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "PROCESSING" => Ok(OrderStatus::Processing),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(StoreError::ParseError(format!(
                "unknown order status '{other}'"
            ))),
        }
    }
}

/// Tables that own images; stored in `images.table_name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageTable {
    Location,
    Category,
    Item,
    Plan,
    PlanItem,
}

impl ImageTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageTable::Location => "locations",
            ImageTable::Category => "categories",
            ImageTable::Item => "items",
            ImageTable::Plan => "plans",
            ImageTable::PlanItem => "plan_items",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRow {
    pub shop_code: String,
    pub name: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub latitude: Decimal,
    pub longitude: Decimal,
    pub contact_no: Option<String>,
    pub open_hours: Option<NaiveTime>,
    pub closed_hours: Option<NaiveTime>,
    pub available: bool,
    pub featured: bool,
    pub saving_upto: Decimal,
    pub created_at: NaiveDateTime,
}

impl FromRow for LocationRow {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            shop_code: row.get("shop_code")?,
            name: row.get("name")?,
            description: row.get("description")?,
            address: row.get("address")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            contact_no: row.get("contact_no")?,
            open_hours: row.get("open_hours")?,
            closed_hours: row.get("closed_hours")?,
            available: row.get("available")?,
            featured: row.get("featured")?,
            saving_upto: row.get("saving_upto")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Category row. `parent_category == 0` marks a root category.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub sub_description: Option<String>,
    pub status: String,
    pub display_order: i32,
    pub saving_upto: Decimal,
    pub parent_category: i64,
    pub category_type: CategoryType,
}

impl FromRow for CategoryRow {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        let category_type: String = row.get("category_type")?;
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            sub_description: row.get("sub_description")?,
            status: row.get("status")?,
            display_order: row.get("display_order")?,
            saving_upto: row.get("saving_upto")?,
            parent_category: row.get("parent_category")?,
            category_type: CategoryType::parse(&category_type)?,
        })
    }
}

/// A `location_categories` link.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryLinkRow {
    pub id: i64,
    pub location: String,
    pub category: i64,
    pub category_type: CategoryType,
}

impl FromRow for CategoryLinkRow {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        let category_type: String = row.get("category_type")?;
        Ok(Self {
            id: row.get("id")?,
            location: row.get("location")?,
            category: row.get("category")?,
            category_type: CategoryType::parse(&category_type)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRow {
    pub id: i64,
    pub item_code: String,
    pub name: String,
    pub description: Option<String>,
    pub quantity: i32,
    pub reorder_level: i32,
    pub price: Decimal,
    pub category: i64,
    pub location: String,
}

impl FromRow for ItemRow {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.get("id")?,
            item_code: row.get("item_code")?,
            name: row.get("name")?,
            description: row.get("description")?,
            quantity: row.get("quantity")?,
            reorder_level: row.get("reorder_level")?,
            price: row.get("price")?,
            category: row.get("category")?,
            location: row.get("location")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRow {
    pub plan_id: String,
    pub name: String,
    pub description: Option<String>,
    pub quantity: i32,
    pub price: Decimal,
    pub frequency: String,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub location: String,
    pub category: i64,
    pub saving_upto: Decimal,
    pub status: String,
}

impl FromRow for PlanRow {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            plan_id: row.get("plan_id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            quantity: row.get("quantity")?,
            price: row.get("price")?,
            frequency: row.get("frequency")?,
            valid_from: row.get("valid_from")?,
            valid_to: row.get("valid_to")?,
            location: row.get("location")?,
            category: row.get("category")?,
            saving_upto: row.get("saving_upto")?,
            status: row.get("status")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItemRow {
    pub id: i64,
    pub plan_id: String,
    pub item_code: String,
    pub item_name: String,
    pub quantity: i32,
    pub price: Decimal,
    pub saving_upto: Decimal,
}

impl FromRow for PlanItemRow {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.get("id")?,
            plan_id: row.get("plan_id")?,
            item_code: row.get("item_code")?,
            item_name: row.get("item_name")?,
            quantity: row.get("quantity")?,
            price: row.get("price")?,
            saving_upto: row.get("saving_upto")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRow {
    pub id: i64,
    pub record_id: String,
    pub table_name: String,
    pub image: String,
    pub display_order: i32,
}

impl FromRow for ImageRow {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.get("id")?,
            record_id: row.get("record_id")?,
            table_name: row.get("table_name")?,
            image: row.get("image")?,
            display_order: row.get("display_order")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRow {
    pub subscription_id: i64,
    pub member_id: i64,
    pub plan_id: String,
    pub item_code: String,
    pub name: String,
    pub usage: i32,
    pub active: bool,
    pub subscribed_date: NaiveDate,
}

impl FromRow for SubscriptionRow {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            subscription_id: row.get("subscription_id")?,
            member_id: row.get("member_id")?,
            plan_id: row.get("plan_id")?,
            item_code: row.get("item_code")?,
            name: row.get("name")?,
            usage: row.get("usage")?,
            active: row.get("active")?,
            subscribed_date: row.get("subscribed_date")?,
        })
    }
}

/// A redemption record, written exactly once per accepted `consume`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionOrder {
    pub id: i64,
    pub subscription_id: i64,
    pub member_id: i64,
    pub item_code: String,
    pub mode: FulfillmentMode,
    pub order_date: NaiveDateTime,
    pub status: ConsumptionStatus,
    pub quantity: i32,
    pub comment: Option<String>,
    pub pickup_time: Option<NaiveTime>,
    pub pickup_date: Option<NaiveDate>,
}

impl FromRow for ConsumptionOrder {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        let mode: String = row.get("mode")?;
        let status: String = row.get("status")?;
        Ok(Self {
            id: row.get("id")?,
            subscription_id: row.get("subscription_id")?,
            member_id: row.get("member_id")?,
            item_code: row.get("item_code")?,
            mode: FulfillmentMode::parse(&mode)?,
            order_date: row.get("order_date")?,
            status: ConsumptionStatus::parse(&status),
            quantity: row.get("quantity")?,
            comment: row.get("comment")?,
            pickup_time: row.get("pickup_time")?,
            pickup_date: row.get("pickup_date")?,
        })
    }
}

/// Point-of-sale order header.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub member_id: i64,
    pub shop_code: String,
    pub order_date: NaiveDateTime,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub vat: Decimal,
    pub grand_total: Decimal,
}

impl FromRow for Order {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        let status: String = row.get("status")?;
        Ok(Self {
            order_id: row.get("order_id")?,
            member_id: row.get("member_id")?,
            shop_code: row.get("shop_code")?,
            order_date: row.get("order_date")?,
            status: OrderStatus::parse(&status)?,
            subtotal: row.get("subtotal")?,
            discount: row.get("discount")?,
            vat: row.get("vat")?,
            grand_total: row.get("grand_total")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: i64,
    pub order_id: String,
    pub shop_code: String,
    pub item_code: String,
    pub quantity: i32,
    pub unit_cost: Decimal,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_cost * Decimal::from(self.quantity)
    }
}

impl FromRow for OrderItem {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.get("id")?,
            order_id: row.get("order_id")?,
            shop_code: row.get("shop_code")?,
            item_code: row.get("item_code")?,
            quantity: row.get("quantity")?,
            unit_cost: row.get("unit_cost")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: i64,
    pub location: String,
    pub member_id: i64,
    pub comment: String,
    pub rating: i32,
    pub added_on: NaiveDate,
    pub approved: bool,
}

impl FromRow for Review {
    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.get("id")?,
            location: row.get("location")?,
            member_id: row.get("member_id")?,
            comment: row.get("comment")?,
            rating: row.get("rating")?,
            added_on: row.get("added_on")?,
            approved: row.get("approved")?,
        })
    }
}

/// Input for a consumption order insert; `id` is assigned by storage.
#[derive(Debug, Clone, PartialEq)]
pub struct NewConsumptionOrder {
    pub subscription_id: i64,
    pub member_id: i64,
    pub item_code: String,
    pub mode: FulfillmentMode,
    pub order_date: NaiveDateTime,
    pub quantity: i32,
    pub comment: Option<String>,
    pub pickup_time: Option<NaiveTime>,
    pub pickup_date: Option<NaiveDate>,
}

impl NewConsumptionOrder {
    pub fn into_order(self, id: i64) -> ConsumptionOrder {
        ConsumptionOrder {
            id,
            subscription_id: self.subscription_id,
            member_id: self.member_id,
            item_code: self.item_code,
            mode: self.mode,
            order_date: self.order_date,
            status: ConsumptionStatus::Pending,
            quantity: self.quantity,
            comment: self.comment,
            pickup_time: self.pickup_time,
            pickup_date: self.pickup_date,
        }
    }
}

/// Input for an order line insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderLine {
    pub order_id: String,
    pub shop_code: String,
    pub item_code: String,
    pub quantity: i32,
    pub unit_cost: Decimal,
}

/// Input for a review insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReview {
    pub location: String,
    pub member_id: i64,
    pub comment: String,
    pub rating: i32,
    pub added_on: NaiveDate,
}

/// Flatten a typed value into an executor row; the inverse of [`FromRow`].
///
/// Used to seed the in-process backend.
pub trait IntoRow {
    fn into_row(self) -> Row;
}

impl IntoRow for LocationRow {
    fn into_row(self) -> Row {
        Row::new()
            .with("shop_code", self.shop_code)
            .with("name", self.name)
            .with("description", self.description)
            .with("address", self.address)
            .with("latitude", self.latitude)
            .with("longitude", self.longitude)
            .with("contact_no", self.contact_no)
            .with("open_hours", self.open_hours)
            .with("closed_hours", self.closed_hours)
            .with("available", self.available)
            .with("featured", self.featured)
            .with("saving_upto", self.saving_upto)
            .with("created_at", self.created_at)
    }
}

impl IntoRow for CategoryRow {
    fn into_row(self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("name", self.name)
            .with("description", self.description)
            .with("sub_description", self.sub_description)
            .with("status", self.status)
            .with("display_order", self.display_order)
            .with("saving_upto", self.saving_upto)
            .with("parent_category", self.parent_category)
            .with("category_type", self.category_type.as_str())
    }
}

impl IntoRow for CategoryLinkRow {
    fn into_row(self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("location", self.location)
            .with("category", self.category)
            .with("category_type", self.category_type.as_str())
    }
}

impl IntoRow for ItemRow {
    fn into_row(self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("item_code", self.item_code)
            .with("name", self.name)
            .with("description", self.description)
            .with("quantity", self.quantity)
            .with("reorder_level", self.reorder_level)
            .with("price", self.price)
            .with("category", self.category)
            .with("location", self.location)
    }
}

impl IntoRow for PlanRow {
    fn into_row(self) -> Row {
        Row::new()
            .with("plan_id", self.plan_id)
            .with("name", self.name)
            .with("description", self.description)
            .with("quantity", self.quantity)
            .with("price", self.price)
            .with("frequency", self.frequency)
            .with("valid_from", self.valid_from)
            .with("valid_to", self.valid_to)
            .with("location", self.location)
            .with("category", self.category)
            .with("saving_upto", self.saving_upto)
            .with("status", self.status)
    }
}

impl IntoRow for PlanItemRow {
    fn into_row(self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("plan_id", self.plan_id)
            .with("item_code", self.item_code)
            .with("item_name", self.item_name)
            .with("quantity", self.quantity)
            .with("price", self.price)
            .with("saving_upto", self.saving_upto)
    }
}

impl IntoRow for ImageRow {
    fn into_row(self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("record_id", self.record_id)
            .with("table_name", self.table_name)
            .with("image", self.image)
            .with("display_order", self.display_order)
    }
}

impl IntoRow for SubscriptionRow {
    fn into_row(self) -> Row {
        Row::new()
            .with("subscription_id", self.subscription_id)
            .with("member_id", self.member_id)
            .with("plan_id", self.plan_id)
            .with("item_code", self.item_code)
            .with("name", self.name)
            .with("usage", self.usage)
            .with("active", self.active)
            .with("subscribed_date", self.subscribed_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trip_through_column_text() {
        for ty in [CategoryType::Location, CategoryType::Item] {
            assert_eq!(CategoryType::parse(ty.as_str()).unwrap(), ty);
        }
        assert_eq!(FulfillmentMode::parse("DINE_IN").unwrap(), FulfillmentMode::DineIn);
        assert_eq!(ConsumptionStatus::parse("READY"), ConsumptionStatus::Ready);
        assert_eq!(
            ConsumptionStatus::parse("pending"),
            ConsumptionStatus::Other("pending".to_string())
        );
        assert!(matches!(
            OrderStatus::parse("SHIPPED"),
            Err(StoreError::ParseError(_))
        ));
    }

    #[test]
    fn test_subscription_from_row() {
        let row = Row::new()
            .with("subscription_id", 7i64)
            .with("member_id", 42i64)
            .with("plan_id", "P-COFFEE-10")
            .with("item_code", "LATTE")
            .with("name", "Ten lattes")
            .with("usage", 10i32)
            .with("active", true)
            .with(
                "subscribed_date",
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            );

        let sub = SubscriptionRow::from_row(&row).unwrap();
        assert_eq!(sub.subscription_id, 7);
        assert_eq!(sub.usage, 10);
        assert_eq!(sub.plan_id, "P-COFFEE-10");
    }

    #[test]
    fn test_category_row_rejects_unknown_type() {
        let row = Row::new()
            .with("id", 1i64)
            .with("name", "Coffee")
            .with("description", Option::<String>::None)
            .with("sub_description", Option::<String>::None)
            .with("status", "active")
            .with("display_order", 1i32)
            .with("saving_upto", Decimal::ZERO)
            .with("parent_category", 0i64)
            .with("category_type", "shelf");
        assert!(CategoryRow::from_row(&row).is_err());
    }

    #[test]
    fn test_order_item_line_total() {
        let line = OrderItem {
            id: 1,
            order_id: "ORD-1".into(),
            shop_code: "C001".into(),
            item_code: "LATTE".into(),
            quantity: 3,
            unit_cost: Decimal::new(450, 2),
        };
        assert_eq!(line.line_total(), Decimal::new(1350, 2));
    }
}
