#![allow(dead_code)]

//! Shared seed data: a small Colombo catalog plus one Kandy shop.
//!
//! - `C001` (6.93, 79.86): Coffee (location type, with plan and item),
//!   Bakery (item type), and a dangling link to category 99
//! - `C002` (6.90, 79.86): Coffee, one plan
//! - `E001` (6.95, 79.87): no categories
//! - `K001` (7.2906, 80.6337): Kandy, outside any Colombo search

use brewpass::fixtures;
use brewpass::model::{CategoryType, ImageTable};
use brewpass::{CatalogAssembler, CatalogRepository, MemoryExecutor, StoredImageResolver};

pub const MEMBER: i64 = 7;
pub const OTHER_MEMBER: i64 = 8;
pub const API_KEY: &str = "key-7";
pub const IMAGE_BASE: &str = "http://img.test";

pub const COFFEE: i64 = 1;
pub const BAKERY: i64 = 2;

pub fn catalog() -> MemoryExecutor {
    let executor = MemoryExecutor::new();

    for (code, lat, lon) in [
        ("C001", 6.93, 79.86),
        ("C002", 6.90, 79.86),
        ("E001", 6.95, 79.87),
        ("K001", 7.2906, 80.6337),
    ] {
        executor.insert("locations", fixtures::location(code, lat, lon));
    }

    executor.insert("categories", fixtures::category(COFFEE, "Coffee", CategoryType::Location));
    executor.insert("categories", fixtures::category(BAKERY, "Bakery", CategoryType::Item));
    let mut espresso = fixtures::category(3, "Espresso", CategoryType::Location);
    espresso.parent_category = COFFEE;
    espresso.display_order = 2;
    executor.insert("categories", espresso);
    let mut filter = fixtures::category(4, "Filter", CategoryType::Location);
    filter.parent_category = COFFEE;
    filter.display_order = 1;
    executor.insert("categories", filter);

    executor.insert("location_categories", fixtures::link(1, "C001", COFFEE, CategoryType::Location));
    executor.insert("location_categories", fixtures::link(2, "C001", 99, CategoryType::Location));
    executor.insert("location_categories", fixtures::link(3, "C001", BAKERY, CategoryType::Item));
    executor.insert("location_categories", fixtures::link(4, "C002", COFFEE, CategoryType::Location));
    executor.insert("location_categories", fixtures::link(5, "K001", COFFEE, CategoryType::Location));

    executor.insert("items", fixtures::item(1, "C001", COFFEE, "LATTE"));
    executor.insert("items", fixtures::item(2, "C001", BAKERY, "CROISSANT"));
    executor.insert("items", fixtures::item(3, "C002", COFFEE, "LATTE"));

    executor.insert("plans", fixtures::plan("P-C001-1", "C001", COFFEE));
    executor.insert("plans", fixtures::plan("P-C002-1", "C002", COFFEE));
    executor.insert("plan_items", fixtures::plan_item(1, "P-C001-1", "LATTE"));
    executor.insert("plan_items", fixtures::plan_item(2, "P-C002-1", "LATTE"));

    executor.insert("images", fixtures::image(1, "C001", ImageTable::Location, "c001-front.png", 2));
    executor.insert("images", fixtures::image(2, "C001", ImageTable::Location, "c001-inside.png", 1));
    executor.insert("images", fixtures::image(3, "1", ImageTable::Category, "coffee.png", 1));
    executor.insert("images", fixtures::image(4, "P-C001-1", ImageTable::Plan, "plan.png", 1));
    executor.insert("images", fixtures::image(5, "P-C001-1", ImageTable::PlanItem, "plan-latte.png", 1));
    executor.insert("images", fixtures::image(6, "LATTE", ImageTable::Item, "latte.png", 1));

    executor.seed("members", fixtures::member(MEMBER, API_KEY));
    executor.seed("members", fixtures::member(OTHER_MEMBER, "key-8"));

    executor
}

/// Adds subscriptions: 1 (member 7, C001 plan, usage `usage`),
/// 2 (member 8, C001 plan, 5) and 3 (member 7, C002 plan, 4).
pub fn with_subscriptions(executor: &MemoryExecutor, usage: i32) {
    executor.insert("subscriptions", fixtures::subscription(1, MEMBER, "P-C001-1", "LATTE", usage));
    executor.insert("subscriptions", fixtures::subscription(2, OTHER_MEMBER, "P-C001-1", "LATTE", 5));
    executor.insert("subscriptions", fixtures::subscription(3, MEMBER, "P-C002-1", "LATTE", 4));
}

pub fn images(executor: &MemoryExecutor) -> StoredImageResolver<'_> {
    StoredImageResolver::new(CatalogRepository::new(executor), IMAGE_BASE)
}

pub fn assembler<'a>(
    executor: &'a MemoryExecutor,
    images: &'a StoredImageResolver<'a>,
) -> CatalogAssembler<'a> {
    CatalogAssembler::new(CatalogRepository::new(executor), images)
}
