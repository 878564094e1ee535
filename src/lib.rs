//! # Brewpass
//!
//! Shop catalog, geo-proximity search and prepaid subscription ledger for the
//! `may` coroutine runtime, on PostgreSQL via `may_postgres`.
//!
//! - [`geo`]: bounding box around a search center
//! - [`repository`]: every statement the crate issues, with bound parameters
//! - [`assembler`]: nested Location → Category → Plan/Item → Image views
//! - [`ledger`]: atomic redemption of prepaid usage
//! - [`orders`], [`reviews`]: point-of-sale orders and location reviews
//! - [`service`]: API-key facade over all of the above
//!
//! Storage is reached through [`QueryExecutor`]/[`TransactionalExecutor`];
//! [`PgExecutor`] talks to Postgres and [`MemoryExecutor`] keeps everything
//! in process.

pub mod assembler;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
#[cfg(any(test, feature = "test-helpers"))]
pub mod fixtures;
pub mod geo;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod orders;
pub mod pool;
pub mod postgres;
pub mod repository;
pub mod resolver;
pub mod reviews;
pub mod runtime;
pub mod schema;
pub mod service;
pub mod view;

pub use assembler::{CatalogAssembler, Nearby, SearchOptions};
pub use config::ServiceConfig;
pub use error::{ErrorKind, ShopError};
pub use executor::{QueryExecutor, Row, Statement, StoreError, TransactionalExecutor};
pub use geo::{bounding_box, GeoBox, GeoPoint};
pub use ledger::{Redemption, SubscriptionLedger};
pub use memory::MemoryExecutor;
pub use orders::{NewOrder, OrderLine, OrderService};
pub use pool::ConnectionPool;
pub use postgres::PgExecutor;
pub use repository::CatalogRepository;
pub use resolver::{
    IdentityResolver, ImageRef, ImageUrlResolver, RepositoryIdentityResolver, StoredImageResolver,
};
pub use reviews::ReviewService;
pub use service::Storefront;
