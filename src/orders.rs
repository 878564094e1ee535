//! Point-of-sale orders.
//!
//! Orders are independent of subscriptions. A header is written first and
//! lines reference it; [`OrderService::place_order_with_lines`] writes both
//! in one transaction.

use crate::error::ShopError;
use crate::executor::{QueryExecutor, TransactionalExecutor};
use crate::model::{NewOrderLine, Order, OrderItem, OrderStatus};
use crate::repository::CatalogRepository;
use chrono::Utc;
use rust_decimal::Decimal;
use std::time::Duration;
use uuid::Uuid;

/// Input for an order header.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    /// Generated when `None`.
    pub order_id: Option<String>,
    pub member_id: i64,
    pub shop_code: String,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub vat: Decimal,
}

/// One line of an order placed together with its header.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    pub item_code: String,
    pub quantity: i32,
    pub unit_cost: Decimal,
}

pub struct OrderService<E> {
    executor: E,
    statement_timeout: Option<Duration>,
}

impl<E: TransactionalExecutor> OrderService<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            statement_timeout: None,
        }
    }

    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Write an order header with status `PROCESSING`.
    ///
    /// `grand_total = subtotal - discount + vat`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for negative amounts, an empty shop code or an order
    /// id that is already taken.
    pub fn place_order(&self, order: NewOrder) -> Result<Order, ShopError> {
        let order = build_order(order)?;
        self.executor.with_transaction(self.statement_timeout, |tx| {
            self.insert_header(tx, &order)?;
            Ok(order)
        })
    }

    /// Append a line to an existing order.
    ///
    /// # Errors
    ///
    /// `NotFound` when the header does not exist, `InvalidArgument` for a
    /// non-positive quantity or a negative unit cost.
    pub fn add_order_line(&self, line: NewOrderLine) -> Result<OrderItem, ShopError> {
        validate_line(&line.item_code, line.quantity, line.unit_cost)?;
        self.executor.with_transaction(self.statement_timeout, |tx| {
            let repository = self.repository_on(tx);
            if repository.find_order(&line.order_id)?.is_none() {
                return Err(ShopError::NotFound(format!("order {}", line.order_id)));
            }
            repository.insert_order_item(line)
        })
    }

    /// Header and lines in one transaction; nothing is written if any line is
    /// rejected.
    pub fn place_order_with_lines(
        &self,
        order: NewOrder,
        lines: Vec<OrderLine>,
    ) -> Result<(Order, Vec<OrderItem>), ShopError> {
        let order = build_order(order)?;
        for line in &lines {
            validate_line(&line.item_code, line.quantity, line.unit_cost)?;
        }
        self.executor.with_transaction(self.statement_timeout, |tx| {
            self.insert_header(tx, &order)?;
            let repository = self.repository_on(tx);
            let items = lines
                .into_iter()
                .map(|line| {
                    repository.insert_order_item(NewOrderLine {
                        order_id: order.order_id.clone(),
                        shop_code: order.shop_code.clone(),
                        item_code: line.item_code,
                        quantity: line.quantity,
                        unit_cost: line.unit_cost,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            log::info!(
                "Placed order {} with {} lines at {}",
                order.order_id,
                items.len(),
                order.shop_code
            );
            Ok((order, items))
        })
    }

    pub fn order(&self, order_id: &str) -> Result<Option<Order>, ShopError> {
        self.repository_on(&self.executor).find_order(order_id)
    }

    pub fn order_lines(&self, order_id: &str) -> Result<Vec<OrderItem>, ShopError> {
        self.repository_on(&self.executor).find_order_items(order_id)
    }

    fn insert_header(&self, tx: &dyn QueryExecutor, order: &Order) -> Result<(), ShopError> {
        self.repository_on(tx).insert_order(order)
    }

    fn repository_on<'t>(&self, executor: &'t dyn QueryExecutor) -> CatalogRepository<'t> {
        CatalogRepository::new(executor).with_timeout(self.statement_timeout)
    }
}

fn build_order(order: NewOrder) -> Result<Order, ShopError> {
    if order.shop_code.is_empty() {
        return Err(ShopError::InvalidArgument("shop code is required".to_string()));
    }
    for (field, amount) in [
        ("subtotal", order.subtotal),
        ("discount", order.discount),
        ("vat", order.vat),
    ] {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ShopError::InvalidArgument(format!(
                "{field} must not be negative, got {amount}"
            )));
        }
    }
    Ok(Order {
        order_id: order
            .order_id
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
        member_id: order.member_id,
        shop_code: order.shop_code,
        order_date: Utc::now().naive_utc(),
        status: OrderStatus::Processing,
        grand_total: order.subtotal - order.discount + order.vat,
        subtotal: order.subtotal,
        discount: order.discount,
        vat: order.vat,
    })
}

fn validate_line(item_code: &str, quantity: i32, unit_cost: Decimal) -> Result<(), ShopError> {
    if item_code.is_empty() {
        return Err(ShopError::InvalidArgument("item code is required".to_string()));
    }
    if quantity <= 0 {
        return Err(ShopError::InvalidArgument(format!(
            "quantity must be positive, got {quantity}"
        )));
    }
    if unit_cost.is_sign_negative() && !unit_cost.is_zero() {
        return Err(ShopError::InvalidArgument(format!(
            "unit cost must not be negative, got {unit_cost}"
        )));
    }
    Ok(())
}
