//! Read models produced by the catalog assembler.
//!
//! Views own their children outright (no back references) and serialize in
//! camelCase for the presentation layer.

use crate::model::{
    CategoryRow, CategoryType, ItemRow, LocationRow, PlanItemRow, PlanRow, SubscriptionRow,
};
use crate::resolver::ImageRef;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::Serialize;

/// A location with its category tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationView {
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
    pub images: Vec<ImageRef>,
    /// `location`-type categories, each with plans and items
    pub categories: Vec<CategoryView>,
    /// `item`-type categories, each with items only; filled by detail lookups
    pub item_categories: Vec<CategoryView>,
    /// Distance from the search center, for search results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

impl LocationView {
    pub fn new(row: LocationRow, images: Vec<ImageRef>) -> Self {
        Self {
            shop_code: row.shop_code,
            name: row.name,
            description: row.description,
            address: row.address,
            latitude: row.latitude,
            longitude: row.longitude,
            contact_no: row.contact_no,
            open_hours: row.open_hours,
            closed_hours: row.closed_hours,
            available: row.available,
            featured: row.featured,
            saving_upto: row.saving_upto,
            created_at: row.created_at,
            images,
            categories: Vec::new(),
            item_categories: Vec::new(),
            distance_km: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryView {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub sub_description: Option<String>,
    pub status: String,
    pub display_order: i32,
    pub saving_upto: Decimal,
    pub category_type: CategoryType,
    pub images: Vec<ImageRef>,
    pub plans: Vec<PlanView>,
    pub items: Vec<ItemView>,
}

impl CategoryView {
    pub fn new(row: CategoryRow, images: Vec<ImageRef>) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            sub_description: row.sub_description,
            status: row.status,
            display_order: row.display_order,
            saving_upto: row.saving_upto,
            category_type: row.category_type,
            images,
            plans: Vec::new(),
            items: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanView {
    pub plan_id: String,
    pub name: String,
    pub description: Option<String>,
    pub quantity: i32,
    pub price: Decimal,
    pub frequency: String,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub location: String,
    pub saving_upto: Decimal,
    pub status: String,
    pub images: Vec<ImageRef>,
    pub items: Vec<PlanItemView>,
}

impl PlanView {
    pub fn new(row: PlanRow, images: Vec<ImageRef>, items: Vec<PlanItemView>) -> Self {
        Self {
            plan_id: row.plan_id,
            name: row.name,
            description: row.description,
            quantity: row.quantity,
            price: row.price,
            frequency: row.frequency,
            valid_from: row.valid_from,
            valid_to: row.valid_to,
            location: row.location,
            saving_upto: row.saving_upto,
            status: row.status,
            images,
            items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItemView {
    pub item_code: String,
    pub item_name: String,
    pub quantity: i32,
    pub price: Decimal,
    pub saving_upto: Decimal,
    pub images: Vec<ImageRef>,
}

impl PlanItemView {
    pub fn new(row: PlanItemRow, images: Vec<ImageRef>) -> Self {
        Self {
            item_code: row.item_code,
            item_name: row.item_name,
            quantity: row.quantity,
            price: row.price,
            saving_upto: row.saving_upto,
            images,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub id: i64,
    pub item_code: String,
    pub name: String,
    pub description: Option<String>,
    pub quantity: i32,
    pub reorder_level: i32,
    pub price: Decimal,
    pub category: i64,
    pub location: String,
    pub images: Vec<ImageRef>,
}

impl ItemView {
    pub fn new(row: ItemRow, images: Vec<ImageRef>) -> Self {
        Self {
            id: row.id,
            item_code: row.item_code,
            name: row.name,
            description: row.description,
            quantity: row.quantity,
            reorder_level: row.reorder_level,
            price: row.price,
            category: row.category,
            location: row.location,
            images,
        }
    }
}

/// Flat projection of a location for list rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSummaryView {
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
    pub images: Vec<ImageRef>,
}

impl LocationSummaryView {
    pub fn new(row: LocationRow, images: Vec<ImageRef>) -> Self {
        Self {
            shop_code: row.shop_code,
            name: row.name,
            description: row.description,
            address: row.address,
            latitude: row.latitude,
            longitude: row.longitude,
            contact_no: row.contact_no,
            open_hours: row.open_hours,
            closed_hours: row.closed_hours,
            available: row.available,
            featured: row.featured,
            saving_upto: row.saving_upto,
            images,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummaryView {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub sub_description: Option<String>,
    pub display_order: i32,
    pub saving_upto: Decimal,
    pub images: Vec<ImageRef>,
}

impl CategorySummaryView {
    pub fn new(row: CategoryRow, images: Vec<ImageRef>) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            sub_description: row.sub_description,
            display_order: row.display_order,
            saving_upto: row.saving_upto,
            images,
        }
    }
}

/// A location where a member holds active subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberLocationView {
    pub location: LocationSummaryView,
    pub plans: Vec<MemberPlanView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPlanView {
    pub plan: PlanView,
    pub subscriptions: Vec<SubscriptionLineView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionLineView {
    pub subscription_id: i64,
    pub name: String,
    pub item_code: String,
    pub remaining: i32,
    pub subscribed_date: NaiveDate,
    /// Images of the subscribed item, keyed by item code
    pub images: Vec<ImageRef>,
}

impl SubscriptionLineView {
    pub fn new(row: SubscriptionRow, images: Vec<ImageRef>) -> Self {
        Self {
            subscription_id: row.subscription_id,
            name: row.name,
            item_code: row.item_code,
            remaining: row.usage,
            subscribed_date: row.subscribed_date,
            images,
        }
    }
}
