//! Table definitions.
//!
//! [`install`] creates every table the repository reads and writes. The DDL is
//! idempotent (`IF NOT EXISTS`) so it can run on every start.

use crate::error::ShopError;
use crate::executor::{QueryExecutor, Statement};

/// One table and the statement that creates it.
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub name: &'static str,
    pub ddl: &'static str,
}

/// Tables in creation order (referenced tables first).
pub const TABLES: &[TableDef] = &[
    TableDef {
        name: "members",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS members (
                id BIGSERIAL PRIMARY KEY,
                api_key VARCHAR(64) NOT NULL UNIQUE
            )
        "#,
    },
    TableDef {
        name: "locations",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS locations (
                shop_code VARCHAR(32) PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                description TEXT,
                address TEXT,
                latitude NUMERIC(15, 12) NOT NULL,
                longitude NUMERIC(15, 12) NOT NULL,
                contact_no VARCHAR(32),
                open_hours TIME,
                closed_hours TIME,
                available BOOLEAN NOT NULL DEFAULT true,
                featured BOOLEAN NOT NULL DEFAULT false,
                saving_upto NUMERIC(12, 2) NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL DEFAULT now()
            )
        "#,
    },
    TableDef {
        name: "categories",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS categories (
                id BIGSERIAL PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                description TEXT,
                sub_description TEXT,
                status VARCHAR(32) NOT NULL DEFAULT 'active',
                display_order INTEGER NOT NULL DEFAULT 0,
                saving_upto NUMERIC(12, 2) NOT NULL DEFAULT 0,
                parent_category BIGINT NOT NULL DEFAULT 0,
                category_type VARCHAR(16) NOT NULL CHECK (category_type IN ('location', 'item'))
            )
        "#,
    },
    TableDef {
        name: "location_categories",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS location_categories (
                id BIGSERIAL PRIMARY KEY,
                location VARCHAR(32) NOT NULL REFERENCES locations(shop_code),
                category BIGINT NOT NULL,
                category_type VARCHAR(16) NOT NULL CHECK (category_type IN ('location', 'item'))
            )
        "#,
    },
    TableDef {
        name: "items",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS items (
                id BIGSERIAL PRIMARY KEY,
                item_code VARCHAR(32) NOT NULL,
                name VARCHAR(255) NOT NULL,
                description TEXT,
                quantity INTEGER NOT NULL DEFAULT 0,
                reorder_level INTEGER NOT NULL DEFAULT 0,
                price NUMERIC(12, 2) NOT NULL,
                category BIGINT NOT NULL,
                location VARCHAR(32) NOT NULL REFERENCES locations(shop_code),
                UNIQUE (location, item_code)
            )
        "#,
    },
    TableDef {
        name: "plans",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS plans (
                plan_id VARCHAR(32) PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                description TEXT,
                quantity INTEGER NOT NULL,
                price NUMERIC(12, 2) NOT NULL,
                frequency VARCHAR(32) NOT NULL,
                valid_from DATE NOT NULL,
                valid_to DATE NOT NULL,
                location VARCHAR(32) NOT NULL REFERENCES locations(shop_code),
                category BIGINT NOT NULL,
                saving_upto NUMERIC(12, 2) NOT NULL DEFAULT 0,
                status VARCHAR(32) NOT NULL DEFAULT 'active'
            )
        "#,
    },
    TableDef {
        name: "plan_items",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS plan_items (
                id BIGSERIAL PRIMARY KEY,
                plan_id VARCHAR(32) NOT NULL REFERENCES plans(plan_id),
                item_code VARCHAR(32) NOT NULL,
                item_name VARCHAR(255) NOT NULL,
                quantity INTEGER NOT NULL,
                price NUMERIC(12, 2) NOT NULL,
                saving_upto NUMERIC(12, 2) NOT NULL DEFAULT 0
            )
        "#,
    },
    TableDef {
        name: "images",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS images (
                id BIGSERIAL PRIMARY KEY,
                record_id VARCHAR(64) NOT NULL,
                table_name VARCHAR(32) NOT NULL,
                image TEXT NOT NULL,
                display_order INTEGER NOT NULL DEFAULT 0
            )
        "#,
    },
    TableDef {
        name: "subscriptions",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                subscription_id BIGSERIAL PRIMARY KEY,
                member_id BIGINT NOT NULL,
                plan_id VARCHAR(32) NOT NULL REFERENCES plans(plan_id),
                item_code VARCHAR(32) NOT NULL,
                name VARCHAR(255) NOT NULL,
                usage INTEGER NOT NULL CHECK (usage >= 0),
                active BOOLEAN NOT NULL DEFAULT true,
                subscribed_date DATE NOT NULL DEFAULT CURRENT_DATE
            )
        "#,
    },
    TableDef {
        name: "consumption_orders",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS consumption_orders (
                id BIGSERIAL PRIMARY KEY,
                subscription_id BIGINT NOT NULL REFERENCES subscriptions(subscription_id),
                member_id BIGINT NOT NULL,
                item_code VARCHAR(32) NOT NULL,
                mode VARCHAR(16) NOT NULL,
                order_date TIMESTAMP NOT NULL,
                status VARCHAR(16) NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                comment TEXT,
                pickup_time TIME,
                pickup_date DATE
            )
        "#,
    },
    TableDef {
        name: "orders",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS orders (
                order_id VARCHAR(64) PRIMARY KEY,
                member_id BIGINT NOT NULL,
                shop_code VARCHAR(32) NOT NULL,
                order_date TIMESTAMP NOT NULL,
                status VARCHAR(16) NOT NULL,
                subtotal NUMERIC(12, 2) NOT NULL,
                discount NUMERIC(12, 2) NOT NULL,
                vat NUMERIC(12, 2) NOT NULL,
                grand_total NUMERIC(12, 2) NOT NULL
            )
        "#,
    },
    TableDef {
        name: "order_items",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS order_items (
                id BIGSERIAL PRIMARY KEY,
                order_id VARCHAR(64) NOT NULL REFERENCES orders(order_id),
                shop_code VARCHAR(32) NOT NULL,
                item_code VARCHAR(32) NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                unit_cost NUMERIC(12, 2) NOT NULL
            )
        "#,
    },
    TableDef {
        name: "reviews",
        ddl: r#"
            CREATE TABLE IF NOT EXISTS reviews (
                id BIGSERIAL PRIMARY KEY,
                location VARCHAR(32) NOT NULL REFERENCES locations(shop_code),
                member_id BIGINT NOT NULL,
                comment TEXT NOT NULL,
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                added_on DATE NOT NULL,
                approved BOOLEAN NOT NULL DEFAULT false
            )
        "#,
    },
];

/// Supporting indexes for the hot lookups.
pub const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_locations_lat_lon ON locations (latitude, longitude)",
    "CREATE INDEX IF NOT EXISTS idx_location_categories_location ON location_categories (location, category_type)",
    "CREATE INDEX IF NOT EXISTS idx_images_record ON images (table_name, record_id, display_order)",
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_member ON subscriptions (member_id)",
];

/// Create all tables and indexes.
///
/// # Errors
///
/// Returns `ShopError::Storage` naming `schema.install` if any statement fails.
pub fn install(executor: &dyn QueryExecutor) -> Result<(), ShopError> {
    for table in TABLES {
        log::debug!("Creating table {}", table.name);
        let statement = Statement::raw("schema.install", table.ddl);
        executor
            .execute(&statement)
            .map_err(|e| ShopError::from_store("schema.install", e))?;
    }
    for index in INDEXES {
        let statement = Statement::raw("schema.install", *index);
        executor
            .execute(&statement)
            .map_err(|e| ShopError::from_store("schema.install", e))?;
    }
    log::info!("Schema installed ({} tables)", TABLES.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_is_idempotent() {
        for table in TABLES {
            assert!(
                table.ddl.contains("IF NOT EXISTS"),
                "{} must be created idempotently",
                table.name
            );
            assert!(table.ddl.contains(table.name));
        }
        assert!(INDEXES.iter().all(|ddl| ddl.contains("IF NOT EXISTS")));
    }

    #[test]
    fn test_usage_cannot_go_negative_at_storage_level() {
        let subscriptions = TABLES
            .iter()
            .find(|t| t.name == "subscriptions")
            .unwrap();
        assert!(subscriptions.ddl.contains("CHECK (usage >= 0)"));
    }
}
