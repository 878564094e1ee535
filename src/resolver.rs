//! Identity and image collaborators.
//!
//! The catalog and ledger depend only on the two traits here. The
//! repository-backed implementations resolve API keys through the `members`
//! table and build image URLs from the `images` table and a base URL.

use crate::error::ShopError;
use crate::model::ImageTable;
use crate::repository::CatalogRepository;
use serde::Serialize;

/// Maps an API key to the member it was issued to.
pub trait IdentityResolver {
    /// `Ok(None)` for an unknown key.
    fn member_id_for_api_key(&self, api_key: &str) -> Result<Option<i64>, ShopError>;
}

/// A displayable image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub url: String,
    pub display_order: i32,
}

/// Resolves the images of a record, sorted by display order.
pub trait ImageUrlResolver {
    fn resolve(&self, record_id: &str, table: ImageTable) -> Result<Vec<ImageRef>, ShopError>;
}

pub struct RepositoryIdentityResolver<'e> {
    repository: CatalogRepository<'e>,
}

impl<'e> RepositoryIdentityResolver<'e> {
    pub fn new(repository: CatalogRepository<'e>) -> Self {
        Self { repository }
    }
}

impl IdentityResolver for RepositoryIdentityResolver<'_> {
    fn member_id_for_api_key(&self, api_key: &str) -> Result<Option<i64>, ShopError> {
        if api_key.is_empty() {
            return Ok(None);
        }
        self.repository.find_member_by_api_key(api_key)
    }
}

/// Images from the `images` table, prefixed with a base URL.
pub struct StoredImageResolver<'e> {
    repository: CatalogRepository<'e>,
    base_url: String,
}

impl<'e> StoredImageResolver<'e> {
    pub fn new(repository: CatalogRepository<'e>, base_url: impl Into<String>) -> Self {
        Self {
            repository,
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, image: &str) -> String {
        if image.starts_with("http://") || image.starts_with("https://") || self.base_url.is_empty()
        {
            return image.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            image.trim_start_matches('/')
        )
    }
}

impl ImageUrlResolver for StoredImageResolver<'_> {
    fn resolve(&self, record_id: &str, table: ImageTable) -> Result<Vec<ImageRef>, ShopError> {
        Ok(self
            .repository
            .find_images(record_id, table)?
            .into_iter()
            .map(|image| ImageRef {
                url: self.url_for(&image.image),
                display_order: image.display_order,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Row;
    use crate::memory::MemoryExecutor;

    fn image(record: &str, table: &str, path: &str, order: i32) -> Row {
        Row::new()
            .with("record_id", record)
            .with("table_name", table)
            .with("image", path)
            .with("display_order", order)
    }

    #[test]
    fn test_images_are_sorted_and_prefixed() {
        let executor = MemoryExecutor::new();
        executor.seed("images", image("C001", "locations", "b.png", 2));
        executor.seed("images", image("C001", "locations", "/a.png", 1));
        executor.seed("images", image("C001", "plans", "x.png", 0));
        executor.seed("images", image("C001", "locations", "https://cdn.example/c.png", 3));

        let resolver =
            StoredImageResolver::new(CatalogRepository::new(&executor), "http://img.local/");
        let images = resolver.resolve("C001", ImageTable::Location).unwrap();
        let urls: Vec<&str> = images.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "http://img.local/a.png",
                "http://img.local/b.png",
                "https://cdn.example/c.png"
            ]
        );
    }

    #[test]
    fn test_unknown_api_key_resolves_to_none() {
        let executor = MemoryExecutor::new();
        executor.seed("members", Row::new().with("api_key", "k-123"));
        let resolver = RepositoryIdentityResolver::new(CatalogRepository::new(&executor));
        assert_eq!(resolver.member_id_for_api_key("k-123").unwrap(), Some(1));
        assert_eq!(resolver.member_id_for_api_key("nope").unwrap(), None);
        assert_eq!(resolver.member_id_for_api_key("").unwrap(), None);
    }
}
