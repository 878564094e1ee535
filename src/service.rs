//! Request-scoped facade.
//!
//! [`Storefront`] ties the identity resolver to the catalog, ledger, order
//! and review services so a request handler only deals with API keys.
//! It holds no per-request state; one instance can serve every request.

use crate::assembler::{CatalogAssembler, SearchOptions};
use crate::config::ServiceConfig;
use crate::error::ShopError;
use crate::executor::TransactionalExecutor;
use crate::ledger::{Redemption, SubscriptionLedger};
use crate::model::{ConsumptionOrder, Order, OrderItem, Review, SubscriptionRow};
use crate::orders::{NewOrder, OrderLine, OrderService};
use crate::repository::CatalogRepository;
use crate::resolver::{IdentityResolver, ImageUrlResolver};
use crate::reviews::ReviewService;
use crate::view::{LocationSummaryView, LocationView, MemberLocationView};
use std::time::Duration;

pub struct Storefront<'a, E> {
    executor: &'a E,
    identity: &'a dyn IdentityResolver,
    images: &'a dyn ImageUrlResolver,
    ledger: SubscriptionLedger<&'a E>,
    orders: OrderService<&'a E>,
    search: SearchOptions,
    default_radius_km: f64,
    statement_timeout: Option<Duration>,
}

impl<'a, E: TransactionalExecutor> Storefront<'a, E> {
    pub fn new(
        executor: &'a E,
        identity: &'a dyn IdentityResolver,
        images: &'a dyn ImageUrlResolver,
        config: &ServiceConfig,
    ) -> Self {
        let statement_timeout = config.database.statement_timeout();
        Self {
            executor,
            identity,
            images,
            ledger: SubscriptionLedger::new(executor, config.ledger.clone())
                .with_statement_timeout(statement_timeout),
            orders: OrderService::new(executor).with_statement_timeout(statement_timeout),
            search: SearchOptions::from(&config.search),
            default_radius_km: config.search.default_radius_km,
            statement_timeout,
        }
    }

    /// Resolve an API key to its member.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for an unknown key.
    pub fn authenticate(&self, api_key: &str) -> Result<i64, ShopError> {
        self.identity
            .member_id_for_api_key(api_key)?
            .ok_or(ShopError::Unauthorized)
    }

    pub fn catalog(&self) -> CatalogAssembler<'a> {
        CatalogAssembler::new(self.repository(), self.images).with_options(self.search)
    }

    /// Proximity search; `radius_km` defaults to the configured radius.
    pub fn search_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: Option<f64>,
    ) -> Result<Vec<LocationView>, ShopError> {
        self.catalog().search_nearby(
            latitude,
            longitude,
            radius_km.unwrap_or(self.default_radius_km),
        )
    }

    /// # Errors
    ///
    /// `NotFound` for an unknown shop code.
    pub fn location_detail(&self, shop_code: &str) -> Result<LocationView, ShopError> {
        self.catalog()
            .get_location_detail(shop_code)?
            .ok_or_else(|| ShopError::NotFound(format!("location {shop_code}")))
    }

    pub fn location_summary(&self, shop_code: &str) -> Result<LocationSummaryView, ShopError> {
        self.catalog()
            .get_location_summary(shop_code)?
            .ok_or_else(|| ShopError::NotFound(format!("location {shop_code}")))
    }

    /// Redeem on behalf of the key's member; `redemption.member_id` is
    /// replaced by the authenticated member.
    pub fn redeem(
        &self,
        api_key: &str,
        redemption: Redemption,
    ) -> Result<ConsumptionOrder, ShopError> {
        let member_id = self.authenticate(api_key)?;
        self.ledger.consume(&Redemption {
            member_id,
            ..redemption
        })
    }

    pub fn my_subscriptions(&self, api_key: &str) -> Result<Vec<SubscriptionRow>, ShopError> {
        let member_id = self.authenticate(api_key)?;
        self.ledger.member_subscriptions(member_id)
    }

    pub fn my_locations(&self, api_key: &str) -> Result<Vec<MemberLocationView>, ShopError> {
        let member_id = self.authenticate(api_key)?;
        self.catalog().member_locations(member_id)
    }

    /// Place an order for the key's member; `order.member_id` is replaced.
    pub fn place_order(
        &self,
        api_key: &str,
        order: NewOrder,
        lines: Vec<OrderLine>,
    ) -> Result<(Order, Vec<OrderItem>), ShopError> {
        let member_id = self.authenticate(api_key)?;
        self.orders
            .place_order_with_lines(NewOrder { member_id, ..order }, lines)
    }

    pub fn add_review(
        &self,
        api_key: &str,
        shop_code: &str,
        comment: &str,
        rating: i32,
    ) -> Result<Review, ShopError> {
        let member_id = self.authenticate(api_key)?;
        ReviewService::new(self.repository()).add_review(member_id, shop_code, comment, rating)
    }

    pub fn ledger(&self) -> &SubscriptionLedger<&'a E> {
        &self.ledger
    }

    pub fn orders(&self) -> &OrderService<&'a E> {
        &self.orders
    }

    fn repository(&self) -> CatalogRepository<'a> {
        CatalogRepository::new(self.executor).with_timeout(self.statement_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::memory::MemoryExecutor;
    use crate::resolver::{RepositoryIdentityResolver, StoredImageResolver};

    #[test]
    fn test_unknown_key_is_unauthorized_before_any_write() {
        let executor = MemoryExecutor::new();
        executor.seed("members", fixtures::member(7, "key-7"));
        let id = executor
            .insert("subscriptions", fixtures::subscription(1, 7, "P1", "LATTE", 5))
            .unwrap();

        let identity = RepositoryIdentityResolver::new(CatalogRepository::new(&executor));
        let images = StoredImageResolver::new(CatalogRepository::new(&executor), "");
        let config = ServiceConfig::default();
        let storefront = Storefront::new(&executor, &identity, &images, &config);

        let err = storefront
            .redeem("wrong", Redemption::new(id, 7, "LATTE", 1))
            .unwrap_err();
        assert_eq!(err.error_code(), "UNAUTHORIZED");
        assert!(executor.rows("consumption_orders").is_empty());

        // member id in the request is ignored in favour of the key's member
        let order = storefront
            .redeem("key-7", Redemption::new(id, 99, "LATTE", 2))
            .unwrap();
        assert_eq!(order.member_id, 7);
        assert_eq!(storefront.my_subscriptions("key-7").unwrap()[0].usage, 3);
    }
}
