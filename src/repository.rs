//! Catalog, subscription and order storage access.
//!
//! [`CatalogRepository`] is the only code in the crate that builds statements.
//! Every statement is assembled with sea-query, every input travels as a bound
//! parameter, and every statement carries a stable name from [`stmt`] which
//! shows up in logs and in `ShopError::Storage`.
//!
//! Read operations are idempotent. A missing row is an empty `Vec` or `None`,
//! never an error.

use crate::error::ShopError;
use crate::executor::{QueryExecutor, Row, Statement};
use crate::geo::GeoBox;
use crate::model::{
    CategoryLinkRow, CategoryRow, CategoryType, ConsumptionOrder, FromRow, ImageRow, ImageTable,
    ItemRow, LocationRow, NewConsumptionOrder, NewOrderLine, NewReview, Order, OrderItem, PlanItemRow,
    PlanRow, Review, SubscriptionRow,
};
use sea_query::{
    Cond, Expr, ExprTrait, LockType, OnConflict, Order as SortOrder, Query, SelectStatement,
};
use std::time::Duration;

/// Statement names.
///
/// Positional parameters are listed where a statement takes more than one,
/// in bind order.
pub mod stmt {
    /// `[lat_min, lat_max, (lon_min, lon_max)+]`
    pub const LOCATIONS_IN_BOX: &str = "locations.in_box";
    pub const LOCATION_BY_CODE: &str = "locations.by_code";
    /// `[shop_code, lat_min, lat_max, (lon_min, lon_max)+]`
    pub const LOCATION_CODE_IN_BOX: &str = "locations.code_in_box";
    /// `[location, category_type]`
    pub const CATEGORY_LINKS: &str = "location_categories.for_location";
    /// `[category, category_type]`
    pub const CATEGORY_LOCATIONS: &str = "location_categories.for_category";
    pub const CATEGORY_BY_ID: &str = "categories.by_id";
    /// `[parent_category, category_type]`
    pub const CHILD_CATEGORIES: &str = "categories.children";
    /// `[location]` or `[location, category]`
    pub const ITEMS_FOR_LOCATION: &str = "items.for_location";
    /// `[location, item_code]`
    pub const ITEM_BY_CODE: &str = "items.by_code";
    /// `[location]` or `[location, category]`
    pub const PLANS_FOR_LOCATION: &str = "plans.for_location";
    pub const PLAN_BY_ID: &str = "plans.by_id";
    pub const PLAN_ITEMS: &str = "plan_items.for_plan";
    /// `[record_id, table_name]`
    pub const IMAGES: &str = "images.for_record";
    pub const SUBSCRIPTION_BY_ID: &str = "subscriptions.by_id";
    pub const SUBSCRIPTION_LOCK: &str = "subscriptions.lock";
    pub const MEMBER_SUBSCRIPTIONS: &str = "subscriptions.for_member";
    /// `[quantity, subscription_id, quantity]`
    pub const SUBSCRIPTION_DECREMENT: &str = "subscriptions.decrement";
    /// consumption order columns in [`super::CONSUMPTION_INSERT_COLUMNS`] order
    pub const CONSUMPTION_INSERT: &str = "consumption_orders.insert";
    pub const CONSUMPTIONS_FOR_SUBSCRIPTION: &str = "consumption_orders.for_subscription";
    /// order columns in [`super::ORDER_COLUMNS`] order
    pub const ORDER_INSERT: &str = "orders.insert";
    pub const ORDER_BY_ID: &str = "orders.by_id";
    /// line columns in [`super::ORDER_ITEM_INSERT_COLUMNS`] order
    pub const ORDER_ITEM_INSERT: &str = "order_items.insert";
    pub const ORDER_ITEMS: &str = "order_items.for_order";
    /// review columns in [`super::REVIEW_INSERT_COLUMNS`] order
    pub const REVIEW_INSERT: &str = "reviews.insert";
    pub const REVIEWS_FOR_LOCATION: &str = "reviews.for_location";
    pub const MEMBER_BY_API_KEY: &str = "members.by_api_key";
}

pub const LOCATION_COLUMNS: &[&str] = &[
    "shop_code",
    "name",
    "description",
    "address",
    "latitude",
    "longitude",
    "contact_no",
    "open_hours",
    "closed_hours",
    "available",
    "featured",
    "saving_upto",
    "created_at",
];

pub const CATEGORY_COLUMNS: &[&str] = &[
    "id",
    "name",
    "description",
    "sub_description",
    "status",
    "display_order",
    "saving_upto",
    "parent_category",
    "category_type",
];

pub const CATEGORY_LINK_COLUMNS: &[&str] = &["id", "location", "category", "category_type"];

pub const ITEM_COLUMNS: &[&str] = &[
    "id",
    "item_code",
    "name",
    "description",
    "quantity",
    "reorder_level",
    "price",
    "category",
    "location",
];

pub const PLAN_COLUMNS: &[&str] = &[
    "plan_id",
    "name",
    "description",
    "quantity",
    "price",
    "frequency",
    "valid_from",
    "valid_to",
    "location",
    "category",
    "saving_upto",
    "status",
];

pub const PLAN_ITEM_COLUMNS: &[&str] = &[
    "id",
    "plan_id",
    "item_code",
    "item_name",
    "quantity",
    "price",
    "saving_upto",
];

pub const IMAGE_COLUMNS: &[&str] = &["id", "record_id", "table_name", "image", "display_order"];

pub const SUBSCRIPTION_COLUMNS: &[&str] = &[
    "subscription_id",
    "member_id",
    "plan_id",
    "item_code",
    "name",
    "usage",
    "active",
    "subscribed_date",
];

pub const CONSUMPTION_COLUMNS: &[&str] = &[
    "id",
    "subscription_id",
    "member_id",
    "item_code",
    "mode",
    "order_date",
    "status",
    "quantity",
    "comment",
    "pickup_time",
    "pickup_date",
];

pub const CONSUMPTION_INSERT_COLUMNS: &[&str] = &[
    "subscription_id",
    "member_id",
    "item_code",
    "mode",
    "order_date",
    "status",
    "quantity",
    "comment",
    "pickup_time",
    "pickup_date",
];

pub const ORDER_COLUMNS: &[&str] = &[
    "order_id",
    "member_id",
    "shop_code",
    "order_date",
    "status",
    "subtotal",
    "discount",
    "vat",
    "grand_total",
];

pub const ORDER_ITEM_COLUMNS: &[&str] = &[
    "id",
    "order_id",
    "shop_code",
    "item_code",
    "quantity",
    "unit_cost",
];

pub const ORDER_ITEM_INSERT_COLUMNS: &[&str] =
    &["order_id", "shop_code", "item_code", "quantity", "unit_cost"];

pub const REVIEW_COLUMNS: &[&str] = &[
    "id",
    "location",
    "member_id",
    "comment",
    "rating",
    "added_on",
    "approved",
];

pub const REVIEW_INSERT_COLUMNS: &[&str] =
    &["location", "member_id", "comment", "rating", "added_on", "approved"];

/// Typed access to every table, over any [`QueryExecutor`].
///
/// The repository borrows its executor, so the same code runs against a pool,
/// an open transaction or the in-process backend.
#[derive(Clone, Copy)]
pub struct CatalogRepository<'e> {
    executor: &'e dyn QueryExecutor,
    timeout: Option<Duration>,
}

impl<'e> CatalogRepository<'e> {
    pub fn new(executor: &'e dyn QueryExecutor) -> Self {
        Self {
            executor,
            timeout: None,
        }
    }

    /// Bound every statement issued through this repository.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn fetch_all<T: FromRow>(&self, statement: Statement) -> Result<Vec<T>, ShopError> {
        let rows = self.rows(statement.clone())?;
        T::from_rows(&rows).map_err(|e| ShopError::from_store(statement.name(), e))
    }

    fn fetch_opt<T: FromRow>(&self, statement: Statement) -> Result<Option<T>, ShopError> {
        let name = statement.name();
        self.rows(statement)?
            .first()
            .map(T::from_row)
            .transpose()
            .map_err(|e| ShopError::from_store(name, e))
    }

    fn rows(&self, statement: Statement) -> Result<Vec<Row>, ShopError> {
        let statement = statement.with_timeout(self.timeout);
        self.executor
            .query(&statement)
            .map_err(|e| ShopError::from_store(statement.name(), e))
    }

    fn run(&self, statement: Statement) -> Result<u64, ShopError> {
        let statement = statement.with_timeout(self.timeout);
        self.executor
            .execute(&statement)
            .map_err(|e| ShopError::from_store(statement.name(), e))
    }

    fn returned_id(&self, statement: Statement) -> Result<i64, ShopError> {
        let name = statement.name();
        let rows = self.rows(statement)?;
        let row = rows.first().ok_or_else(|| ShopError::Storage {
            operation: name,
            source: crate::executor::StoreError::QueryError("insert returned no id".to_string()),
        })?;
        row.get::<i64>("id")
            .map_err(|e| ShopError::from_store(name, e))
    }

    // ---- locations ----------------------------------------------------------

    /// Locations whose coordinates fall inside `bbox` (inclusive), ordered by
    /// shop code.
    pub fn find_locations_in_box(&self, bbox: &GeoBox) -> Result<Vec<LocationRow>, ShopError> {
        let mut query = Query::select();
        query
            .columns(LOCATION_COLUMNS.iter().copied())
            .from("locations");
        apply_box(&mut query, bbox)?;
        query.order_by("shop_code", SortOrder::Asc);
        self.fetch_all(Statement::select(stmt::LOCATIONS_IN_BOX, &query))
    }

    pub fn find_location_by_code(&self, code: &str) -> Result<Option<LocationRow>, ShopError> {
        let mut query = Query::select();
        query
            .columns(LOCATION_COLUMNS.iter().copied())
            .from("locations")
            .and_where(Expr::col("shop_code").eq(code));
        self.fetch_opt(Statement::select(stmt::LOCATION_BY_CODE, &query))
    }

    /// Whether the location exists and lies inside `bbox`.
    pub fn location_in_box(&self, code: &str, bbox: &GeoBox) -> Result<bool, ShopError> {
        let mut query = Query::select();
        query
            .column("shop_code")
            .from("locations")
            .and_where(Expr::col("shop_code").eq(code));
        apply_box(&mut query, bbox)?;
        Ok(!self
            .rows(Statement::select(stmt::LOCATION_CODE_IN_BOX, &query))?
            .is_empty())
    }

    // ---- categories ---------------------------------------------------------

    /// Links attaching categories of `category_type` to a location, in link
    /// order.
    pub fn find_category_links(
        &self,
        code: &str,
        category_type: CategoryType,
    ) -> Result<Vec<CategoryLinkRow>, ShopError> {
        let mut query = Query::select();
        query
            .columns(CATEGORY_LINK_COLUMNS.iter().copied())
            .from("location_categories")
            .and_where(Expr::col("location").eq(code))
            .and_where(Expr::col("category_type").eq(category_type.as_str()))
            .order_by("id", SortOrder::Asc);
        self.fetch_all(Statement::select(stmt::CATEGORY_LINKS, &query))
    }

    /// Categories attached to a location under `category_type`, in link
    /// order. Links pointing at a missing category are skipped.
    pub fn find_categories_for_location(
        &self,
        code: &str,
        category_type: CategoryType,
    ) -> Result<Vec<CategoryRow>, ShopError> {
        let links = self.find_category_links(code, category_type)?;
        let mut categories = Vec::with_capacity(links.len());
        for link in links {
            match self.find_category_by_id(link.category)? {
                Some(category) => categories.push(category),
                None => log::debug!(
                    "Skipping link {} on {}: category {} does not exist",
                    link.id,
                    code,
                    link.category
                ),
            }
        }
        Ok(categories)
    }

    pub fn find_category_by_id(&self, id: i64) -> Result<Option<CategoryRow>, ShopError> {
        let mut query = Query::select();
        query
            .columns(CATEGORY_COLUMNS.iter().copied())
            .from("categories")
            .and_where(Expr::col("id").eq(id));
        self.fetch_opt(Statement::select(stmt::CATEGORY_BY_ID, &query))
    }

    /// Categories below `parent` (0 for roots), by display order then id.
    pub fn find_child_categories(
        &self,
        parent: i64,
        category_type: CategoryType,
    ) -> Result<Vec<CategoryRow>, ShopError> {
        let mut query = Query::select();
        query
            .columns(CATEGORY_COLUMNS.iter().copied())
            .from("categories")
            .and_where(Expr::col("parent_category").eq(parent))
            .and_where(Expr::col("category_type").eq(category_type.as_str()))
            .order_by("display_order", SortOrder::Asc)
            .order_by("id", SortOrder::Asc);
        self.fetch_all(Statement::select(stmt::CHILD_CATEGORIES, &query))
    }

    /// Shop codes carrying the category under `category_type`, in link order.
    pub fn find_category_locations(
        &self,
        category_id: i64,
        category_type: CategoryType,
    ) -> Result<Vec<String>, ShopError> {
        let mut query = Query::select();
        query
            .columns(CATEGORY_LINK_COLUMNS.iter().copied())
            .from("location_categories")
            .and_where(Expr::col("category").eq(category_id))
            .and_where(Expr::col("category_type").eq(category_type.as_str()))
            .order_by("id", SortOrder::Asc);
        let links: Vec<CategoryLinkRow> =
            self.fetch_all(Statement::select(stmt::CATEGORY_LOCATIONS, &query))?;
        Ok(links.into_iter().map(|link| link.location).collect())
    }

    // ---- items & plans ------------------------------------------------------

    /// Items of a location, optionally narrowed to one category, by id.
    pub fn find_items_for_location(
        &self,
        code: &str,
        category_id: Option<i64>,
    ) -> Result<Vec<ItemRow>, ShopError> {
        let mut query = Query::select();
        query
            .columns(ITEM_COLUMNS.iter().copied())
            .from("items")
            .and_where(Expr::col("location").eq(code));
        if let Some(category_id) = category_id {
            query.and_where(Expr::col("category").eq(category_id));
        }
        query.order_by("id", SortOrder::Asc);
        self.fetch_all(Statement::select(stmt::ITEMS_FOR_LOCATION, &query))
    }

    pub fn find_item(&self, code: &str, item_code: &str) -> Result<Option<ItemRow>, ShopError> {
        let mut query = Query::select();
        query
            .columns(ITEM_COLUMNS.iter().copied())
            .from("items")
            .and_where(Expr::col("location").eq(code))
            .and_where(Expr::col("item_code").eq(item_code));
        self.fetch_opt(Statement::select(stmt::ITEM_BY_CODE, &query))
    }

    /// Plans of a location, optionally narrowed to one category, by plan id.
    pub fn find_plans_for_location(
        &self,
        code: &str,
        category_id: Option<i64>,
    ) -> Result<Vec<PlanRow>, ShopError> {
        let mut query = Query::select();
        query
            .columns(PLAN_COLUMNS.iter().copied())
            .from("plans")
            .and_where(Expr::col("location").eq(code));
        if let Some(category_id) = category_id {
            query.and_where(Expr::col("category").eq(category_id));
        }
        query.order_by("plan_id", SortOrder::Asc);
        self.fetch_all(Statement::select(stmt::PLANS_FOR_LOCATION, &query))
    }

    pub fn find_plan(&self, plan_id: &str) -> Result<Option<PlanRow>, ShopError> {
        let mut query = Query::select();
        query
            .columns(PLAN_COLUMNS.iter().copied())
            .from("plans")
            .and_where(Expr::col("plan_id").eq(plan_id));
        self.fetch_opt(Statement::select(stmt::PLAN_BY_ID, &query))
    }

    pub fn find_plan_items(&self, plan_id: &str) -> Result<Vec<PlanItemRow>, ShopError> {
        let mut query = Query::select();
        query
            .columns(PLAN_ITEM_COLUMNS.iter().copied())
            .from("plan_items")
            .and_where(Expr::col("plan_id").eq(plan_id))
            .order_by("id", SortOrder::Asc);
        self.fetch_all(Statement::select(stmt::PLAN_ITEMS, &query))
    }

    /// Images of one record, by display order then id.
    pub fn find_images(&self, record_id: &str, table: ImageTable) -> Result<Vec<ImageRow>, ShopError> {
        let mut query = Query::select();
        query
            .columns(IMAGE_COLUMNS.iter().copied())
            .from("images")
            .and_where(Expr::col("record_id").eq(record_id))
            .and_where(Expr::col("table_name").eq(table.as_str()))
            .order_by("display_order", SortOrder::Asc)
            .order_by("id", SortOrder::Asc);
        self.fetch_all(Statement::select(stmt::IMAGES, &query))
    }

    // ---- subscriptions ------------------------------------------------------

    pub fn find_subscription(&self, id: i64) -> Result<Option<SubscriptionRow>, ShopError> {
        let mut query = Query::select();
        query
            .columns(SUBSCRIPTION_COLUMNS.iter().copied())
            .from("subscriptions")
            .and_where(Expr::col("subscription_id").eq(id));
        self.fetch_opt(Statement::select(stmt::SUBSCRIPTION_BY_ID, &query))
    }

    /// Read the subscription and hold its row lock until the enclosing
    /// transaction ends. Only meaningful inside a transaction.
    pub fn lock_subscription(&self, id: i64) -> Result<Option<SubscriptionRow>, ShopError> {
        let mut query = Query::select();
        query
            .columns(SUBSCRIPTION_COLUMNS.iter().copied())
            .from("subscriptions")
            .and_where(Expr::col("subscription_id").eq(id))
            .lock(LockType::Update);
        self.fetch_opt(Statement::select(stmt::SUBSCRIPTION_LOCK, &query))
    }

    pub fn find_member_subscriptions(&self, member_id: i64) -> Result<Vec<SubscriptionRow>, ShopError> {
        let mut query = Query::select();
        query
            .columns(SUBSCRIPTION_COLUMNS.iter().copied())
            .from("subscriptions")
            .and_where(Expr::col("member_id").eq(member_id))
            .order_by("subscription_id", SortOrder::Asc);
        self.fetch_all(Statement::select(stmt::MEMBER_SUBSCRIPTIONS, &query))
    }

    /// Guarded decrement: only applies while `usage >= quantity`.
    /// Returns the number of rows changed (0 or 1).
    pub fn decrement_usage(&self, id: i64, quantity: i32) -> Result<u64, ShopError> {
        let mut query = Query::update();
        query
            .table("subscriptions")
            .value("usage", Expr::col("usage").sub(quantity))
            .and_where(Expr::col("subscription_id").eq(id))
            .and_where(Expr::col("usage").gte(quantity));
        self.run(Statement::update(stmt::SUBSCRIPTION_DECREMENT, &query))
    }

    pub fn insert_consumption_order(
        &self,
        order: NewConsumptionOrder,
    ) -> Result<ConsumptionOrder, ShopError> {
        let mut query = Query::insert();
        query
            .into_table("consumption_orders")
            .columns(CONSUMPTION_INSERT_COLUMNS.iter().copied())
            .values(vec![
                Expr::val(order.subscription_id),
                Expr::val(order.member_id),
                Expr::val(order.item_code.clone()),
                Expr::val(order.mode.as_str()),
                Expr::val(order.order_date),
                Expr::val(crate::model::ConsumptionStatus::Pending.as_str()),
                Expr::val(order.quantity),
                Expr::val(order.comment.clone()),
                Expr::val(order.pickup_time),
                Expr::val(order.pickup_date),
            ])
            .map_err(|e| invalid_statement(stmt::CONSUMPTION_INSERT, e))?;
        query.returning_col("id");
        let id = self.returned_id(Statement::insert(stmt::CONSUMPTION_INSERT, &query))?;
        Ok(order.into_order(id))
    }

    pub fn find_consumption_orders(
        &self,
        subscription_id: i64,
    ) -> Result<Vec<ConsumptionOrder>, ShopError> {
        let mut query = Query::select();
        query
            .columns(CONSUMPTION_COLUMNS.iter().copied())
            .from("consumption_orders")
            .and_where(Expr::col("subscription_id").eq(subscription_id))
            .order_by("id", SortOrder::Asc);
        self.fetch_all(Statement::select(stmt::CONSUMPTIONS_FOR_SUBSCRIPTION, &query))
    }

    // ---- orders -------------------------------------------------------------

    /// Insert an order header.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the order id is already taken. The insert skips
    /// conflicting rows so concurrent writers never surface a key violation.
    pub fn insert_order(&self, order: &Order) -> Result<(), ShopError> {
        let mut query = Query::insert();
        query
            .into_table("orders")
            .columns(ORDER_COLUMNS.iter().copied())
            .values(vec![
                Expr::val(order.order_id.clone()),
                Expr::val(order.member_id),
                Expr::val(order.shop_code.clone()),
                Expr::val(order.order_date),
                Expr::val(order.status.as_str()),
                Expr::val(order.subtotal),
                Expr::val(order.discount),
                Expr::val(order.vat),
                Expr::val(order.grand_total),
            ])
            .map_err(|e| invalid_statement(stmt::ORDER_INSERT, e))?;
        query.on_conflict(OnConflict::column("order_id").do_nothing().to_owned());
        if self.run(Statement::insert(stmt::ORDER_INSERT, &query))? == 0 {
            return Err(ShopError::InvalidArgument(format!(
                "order {} already exists",
                order.order_id
            )));
        }
        Ok(())
    }

    pub fn find_order(&self, order_id: &str) -> Result<Option<Order>, ShopError> {
        let mut query = Query::select();
        query
            .columns(ORDER_COLUMNS.iter().copied())
            .from("orders")
            .and_where(Expr::col("order_id").eq(order_id));
        self.fetch_opt(Statement::select(stmt::ORDER_BY_ID, &query))
    }

    pub fn insert_order_item(&self, line: NewOrderLine) -> Result<OrderItem, ShopError> {
        let mut query = Query::insert();
        query
            .into_table("order_items")
            .columns(ORDER_ITEM_INSERT_COLUMNS.iter().copied())
            .values(vec![
                Expr::val(line.order_id.clone()),
                Expr::val(line.shop_code.clone()),
                Expr::val(line.item_code.clone()),
                Expr::val(line.quantity),
                Expr::val(line.unit_cost),
            ])
            .map_err(|e| invalid_statement(stmt::ORDER_ITEM_INSERT, e))?;
        query.returning_col("id");
        let id = self.returned_id(Statement::insert(stmt::ORDER_ITEM_INSERT, &query))?;
        Ok(OrderItem {
            id,
            order_id: line.order_id,
            shop_code: line.shop_code,
            item_code: line.item_code,
            quantity: line.quantity,
            unit_cost: line.unit_cost,
        })
    }

    pub fn find_order_items(&self, order_id: &str) -> Result<Vec<OrderItem>, ShopError> {
        let mut query = Query::select();
        query
            .columns(ORDER_ITEM_COLUMNS.iter().copied())
            .from("order_items")
            .and_where(Expr::col("order_id").eq(order_id))
            .order_by("id", SortOrder::Asc);
        self.fetch_all(Statement::select(stmt::ORDER_ITEMS, &query))
    }

    // ---- reviews & members --------------------------------------------------

    pub fn insert_review(&self, review: NewReview) -> Result<Review, ShopError> {
        let mut query = Query::insert();
        query
            .into_table("reviews")
            .columns(REVIEW_INSERT_COLUMNS.iter().copied())
            .values(vec![
                Expr::val(review.location.clone()),
                Expr::val(review.member_id),
                Expr::val(review.comment.clone()),
                Expr::val(review.rating),
                Expr::val(review.added_on),
                Expr::val(false),
            ])
            .map_err(|e| invalid_statement(stmt::REVIEW_INSERT, e))?;
        query.returning_col("id");
        let id = self.returned_id(Statement::insert(stmt::REVIEW_INSERT, &query))?;
        Ok(Review {
            id,
            location: review.location,
            member_id: review.member_id,
            comment: review.comment,
            rating: review.rating,
            added_on: review.added_on,
            approved: false,
        })
    }

    pub fn find_reviews(&self, location: &str) -> Result<Vec<Review>, ShopError> {
        let mut query = Query::select();
        query
            .columns(REVIEW_COLUMNS.iter().copied())
            .from("reviews")
            .and_where(Expr::col("location").eq(location))
            .order_by("id", SortOrder::Asc);
        self.fetch_all(Statement::select(stmt::REVIEWS_FOR_LOCATION, &query))
    }

    pub fn find_member_by_api_key(&self, api_key: &str) -> Result<Option<i64>, ShopError> {
        let mut query = Query::select();
        query
            .column("id")
            .from("members")
            .and_where(Expr::col("api_key").eq(api_key));
        let rows = self.rows(Statement::select(stmt::MEMBER_BY_API_KEY, &query))?;
        rows.first()
            .map(|row| row.get::<i64>("id"))
            .transpose()
            .map_err(|e| ShopError::from_store(stmt::MEMBER_BY_API_KEY, e))
    }
}

/// `latitude BETWEEN .. AND (longitude BETWEEN .. OR longitude BETWEEN ..)`
fn apply_box(query: &mut SelectStatement, bbox: &GeoBox) -> Result<(), ShopError> {
    let bounds = bbox.decimal_bounds()?;
    let mut longitude = Cond::any();
    for (min, max) in bounds.lon_ranges {
        longitude = longitude.add(Expr::col("longitude").between(min, max));
    }
    query
        .and_where(Expr::col("latitude").between(bounds.lat.0, bounds.lat.1))
        .cond_where(longitude);
    Ok(())
}

fn invalid_statement(operation: &'static str, err: impl std::fmt::Display) -> ShopError {
    ShopError::Storage {
        operation,
        source: crate::executor::StoreError::QueryError(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::StoreError;
    use crate::geo::bounding_box;
    use std::sync::Mutex;

    /// Records statements and returns canned rows.
    #[derive(Default)]
    struct CapturingExecutor {
        statements: Mutex<Vec<Statement>>,
        fail: bool,
    }

    impl QueryExecutor for CapturingExecutor {
        fn query(&self, statement: &Statement) -> Result<Vec<Row>, StoreError> {
            self.statements.lock().unwrap().push(statement.clone());
            if self.fail {
                return Err(StoreError::Other("connection reset".into()));
            }
            Ok(Vec::new())
        }

        fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
            self.statements.lock().unwrap().push(statement.clone());
            Ok(1)
        }
    }

    #[test]
    fn test_order_insert_skips_conflicting_ids() {
        let executor = CapturingExecutor::default();
        let repo = CatalogRepository::new(&executor);
        let order = Order {
            order_id: "O-1".to_string(),
            member_id: 7,
            shop_code: "C001".to_string(),
            order_date: chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            status: crate::model::OrderStatus::Processing,
            subtotal: rust_decimal::Decimal::TEN,
            discount: rust_decimal::Decimal::ZERO,
            vat: rust_decimal::Decimal::ONE,
            grand_total: rust_decimal::Decimal::new(11, 0),
        };
        repo.insert_order(&order).unwrap();

        let statements = executor.statements.lock().unwrap();
        assert_eq!(statements[0].name(), stmt::ORDER_INSERT);
        assert!(statements[0].sql().contains("ON CONFLICT (\"order_id\") DO NOTHING"));
        assert_eq!(statements[0].values().len(), ORDER_COLUMNS.len());
    }

    #[test]
    fn test_box_query_binds_all_bounds() {
        let executor = CapturingExecutor::default();
        let repo = CatalogRepository::new(&executor);
        let bbox = bounding_box(6.9271, 79.8612, 5.0).unwrap();

        assert!(repo.find_locations_in_box(&bbox).unwrap().is_empty());

        let statements = executor.statements.lock().unwrap();
        assert_eq!(statements[0].name(), stmt::LOCATIONS_IN_BOX);
        assert_eq!(statements[0].values().len(), 4);
        assert!(statements[0].sql().contains("BETWEEN"));
        assert!(!statements[0].sql().contains("6.9"));
    }

    #[test]
    fn test_antimeridian_box_binds_two_longitude_ranges() {
        let executor = CapturingExecutor::default();
        let repo = CatalogRepository::new(&executor);
        let bbox = bounding_box(0.0, 179.99, 10.0).unwrap();

        repo.find_locations_in_box(&bbox).unwrap();
        let statements = executor.statements.lock().unwrap();
        assert_eq!(statements[0].values().len(), 6);
        assert!(statements[0].sql().contains(" OR "));
    }

    #[test]
    fn test_lock_statement_uses_for_update() {
        let executor = CapturingExecutor::default();
        let repo = CatalogRepository::new(&executor);
        assert!(repo.lock_subscription(7).unwrap().is_none());
        let statements = executor.statements.lock().unwrap();
        assert!(statements[0].sql().ends_with("FOR UPDATE"));
    }

    #[test]
    fn test_decrement_is_guarded_on_remaining_usage() {
        let executor = CapturingExecutor::default();
        let repo = CatalogRepository::new(&executor);
        assert_eq!(repo.decrement_usage(7, 4).unwrap(), 1);
        let statements = executor.statements.lock().unwrap();
        let sql = statements[0].sql();
        assert!(sql.contains(">="), "{sql}");
        assert_eq!(statements[0].values().len(), 3);
    }

    #[test]
    fn test_timeout_is_attached_to_every_statement() {
        let executor = CapturingExecutor::default();
        let repo = CatalogRepository::new(&executor).with_timeout(Some(Duration::from_millis(500)));
        repo.find_location_by_code("C001").unwrap();
        repo.find_plan_items("P1").unwrap();
        let statements = executor.statements.lock().unwrap();
        assert!(statements
            .iter()
            .all(|s| s.timeout() == Some(Duration::from_millis(500))));
    }

    #[test]
    fn test_storage_failure_names_the_statement() {
        let executor = CapturingExecutor {
            fail: true,
            ..Default::default()
        };
        let repo = CatalogRepository::new(&executor);
        match repo.find_images("C001", ImageTable::Location) {
            Err(ShopError::Storage { operation, .. }) => assert_eq!(operation, stmt::IMAGES),
            other => panic!("expected storage error, got {other:?}"),
        }
    }
}
