//! Ready-made rows for seeding a [`MemoryExecutor`](crate::memory::MemoryExecutor).
//!
//! Each builder fills the required columns with plausible values; adjust the
//! returned struct for anything a test cares about.

use crate::executor::Row;
use crate::model::{
    CategoryLinkRow, CategoryRow, CategoryType, ImageRow, ImageTable, ItemRow, LocationRow,
    PlanItemRow, PlanRow, SubscriptionRow,
};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

fn opened() -> NaiveDateTime {
    date(2024, 1, 1).and_hms_opt(8, 0, 0).unwrap_or_default()
}

pub fn location(shop_code: &str, latitude: f64, longitude: f64) -> LocationRow {
    LocationRow {
        shop_code: shop_code.to_string(),
        name: format!("Shop {shop_code}"),
        description: None,
        address: None,
        latitude: Decimal::from_f64(latitude).unwrap_or_default(),
        longitude: Decimal::from_f64(longitude).unwrap_or_default(),
        contact_no: None,
        open_hours: None,
        closed_hours: None,
        available: true,
        featured: false,
        saving_upto: Decimal::ZERO,
        created_at: opened(),
    }
}

/// A root category.
pub fn category(id: i64, name: &str, category_type: CategoryType) -> CategoryRow {
    CategoryRow {
        id,
        name: name.to_string(),
        description: None,
        sub_description: None,
        status: "active".to_string(),
        display_order: 0,
        saving_upto: Decimal::ZERO,
        parent_category: 0,
        category_type,
    }
}

pub fn link(id: i64, location: &str, category: i64, category_type: CategoryType) -> CategoryLinkRow {
    CategoryLinkRow {
        id,
        location: location.to_string(),
        category,
        category_type,
    }
}

pub fn item(id: i64, location: &str, category: i64, item_code: &str) -> ItemRow {
    ItemRow {
        id,
        item_code: item_code.to_string(),
        name: item_code.to_lowercase(),
        description: None,
        quantity: 100,
        reorder_level: 10,
        price: Decimal::new(450, 2),
        category,
        location: location.to_string(),
    }
}

/// A ten-unit monthly plan valid through 2024.
pub fn plan(plan_id: &str, location: &str, category: i64) -> PlanRow {
    PlanRow {
        plan_id: plan_id.to_string(),
        name: format!("Plan {plan_id}"),
        description: None,
        quantity: 10,
        price: Decimal::new(3500, 2),
        frequency: "monthly".to_string(),
        valid_from: date(2024, 1, 1),
        valid_to: date(2024, 12, 31),
        location: location.to_string(),
        category,
        saving_upto: Decimal::ZERO,
        status: "active".to_string(),
    }
}

pub fn plan_item(id: i64, plan_id: &str, item_code: &str) -> PlanItemRow {
    PlanItemRow {
        id,
        plan_id: plan_id.to_string(),
        item_code: item_code.to_string(),
        item_name: item_code.to_lowercase(),
        quantity: 10,
        price: Decimal::new(450, 2),
        saving_upto: Decimal::ZERO,
    }
}

pub fn image(id: i64, record_id: &str, table: ImageTable, path: &str, display_order: i32) -> ImageRow {
    ImageRow {
        id,
        record_id: record_id.to_string(),
        table_name: table.as_str().to_string(),
        image: path.to_string(),
        display_order,
    }
}

/// An active subscription.
pub fn subscription(
    subscription_id: i64,
    member_id: i64,
    plan_id: &str,
    item_code: &str,
    usage: i32,
) -> SubscriptionRow {
    SubscriptionRow {
        subscription_id,
        member_id,
        plan_id: plan_id.to_string(),
        item_code: item_code.to_string(),
        name: format!("{plan_id} {item_code}"),
        usage,
        active: true,
        subscribed_date: date(2024, 3, 1),
    }
}

pub fn member(id: i64, api_key: &str) -> Row {
    Row::new().with("id", id).with("api_key", api_key)
}
