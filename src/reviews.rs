//! Member reviews of a location. New reviews await moderation
//! (`approved = false`).

use crate::error::ShopError;
use crate::executor::QueryExecutor;
use crate::model::{NewReview, Review};
use crate::repository::CatalogRepository;
use chrono::Utc;

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 5;

pub struct ReviewService<'e> {
    repository: CatalogRepository<'e>,
}

impl<'e> ReviewService<'e> {
    pub fn new(repository: CatalogRepository<'e>) -> Self {
        Self { repository }
    }

    pub fn on(executor: &'e dyn QueryExecutor) -> Self {
        Self::new(CatalogRepository::new(executor))
    }

    /// # Errors
    ///
    /// `InvalidArgument` for a rating outside 1..=5 or an empty comment,
    /// `NotFound` when the location does not exist.
    pub fn add_review(
        &self,
        member_id: i64,
        location: &str,
        comment: &str,
        rating: i32,
    ) -> Result<Review, ShopError> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(ShopError::InvalidArgument(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING}, got {rating}"
            )));
        }
        let comment = comment.trim();
        if comment.is_empty() {
            return Err(ShopError::InvalidArgument("comment is required".to_string()));
        }
        if self.repository.find_location_by_code(location)?.is_none() {
            return Err(ShopError::NotFound(format!("location {location}")));
        }
        self.repository.insert_review(NewReview {
            location: location.to_string(),
            member_id,
            comment: comment.to_string(),
            rating,
            added_on: Utc::now().date_naive(),
        })
    }

    /// Reviews of a location, oldest first.
    pub fn reviews(&self, location: &str) -> Result<Vec<Review>, ShopError> {
        self.repository.find_reviews(location)
    }
}
