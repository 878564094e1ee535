//! Catalog tree assembly.
//!
//! [`CatalogAssembler`] turns flat repository rows into the nested
//! Location → Category → {Plan, Item} → Image views. Children keep the order
//! the repository returns them in, so the same data always yields the same
//! tree. Any child lookup failure fails the whole call.

use crate::config::SearchConfig;
use crate::error::ShopError;
use crate::geo::{GeoBox, GeoPoint};
use crate::model::{CategoryRow, CategoryType, ImageTable, ItemRow, LocationRow, PlanRow};
use crate::repository::CatalogRepository;
use crate::resolver::{ImageRef, ImageUrlResolver};
use crate::view::{
    CategorySummaryView, CategoryView, ItemView, LocationSummaryView, LocationView,
    MemberLocationView, MemberPlanView, PlanItemView, PlanView, SubscriptionLineView,
};
use rust_decimal::prelude::ToPrimitive;
use std::cmp::Ordering;

/// Opt-in refinements of a proximity search.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SearchOptions {
    /// Drop locations in the box corners, beyond the great-circle radius.
    pub exact_radius: bool,
    /// Nearest first; ties keep repository order.
    pub sort_by_distance: bool,
    /// Reject larger radii as invalid.
    pub max_radius_km: Option<f64>,
}

impl From<&SearchConfig> for SearchOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            exact_radius: config.exact_radius,
            sort_by_distance: config.sort_by_distance,
            max_radius_km: Some(config.max_radius_km),
        }
    }
}

/// A search center and radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearby {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

impl Nearby {
    pub fn new(latitude: f64, longitude: f64, radius_km: f64) -> Self {
        Self {
            latitude,
            longitude,
            radius_km,
        }
    }

    fn bounding_box(&self) -> Result<GeoBox, ShopError> {
        GeoBox::compute(GeoPoint::new(self.latitude, self.longitude)?, self.radius_km)
    }
}

pub struct CatalogAssembler<'a> {
    repository: CatalogRepository<'a>,
    images: &'a dyn ImageUrlResolver,
    options: SearchOptions,
}

impl<'a> CatalogAssembler<'a> {
    pub fn new(repository: CatalogRepository<'a>, images: &'a dyn ImageUrlResolver) -> Self {
        Self {
            repository,
            images,
            options: SearchOptions::default(),
        }
    }

    /// Default options for [`CatalogAssembler::search_nearby`].
    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn repository(&self) -> &CatalogRepository<'a> {
        &self.repository
    }

    /// Locations inside the bounding box of `radius_km` around the center,
    /// ordered by shop code, each with its `location`-type categories.
    pub fn search_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<Vec<LocationView>, ShopError> {
        self.search_nearby_with(latitude, longitude, radius_km, self.options)
    }

    pub fn search_nearby_with(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        options: SearchOptions,
    ) -> Result<Vec<LocationView>, ShopError> {
        if let Some(max) = options.max_radius_km {
            if radius_km > max {
                return Err(ShopError::InvalidArgument(format!(
                    "radius must not exceed {max} km, got {radius_km}"
                )));
            }
        }
        let center = GeoPoint::new(latitude, longitude)?;
        let bbox = GeoBox::compute(center, radius_km)?;
        let rows = self.repository.find_locations_in_box(&bbox)?;
        let found = rows.len();

        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            let distance = location_point(&row).map(|point| center.distance_km(&point));
            if options.exact_radius && !distance.is_some_and(|d| d <= radius_km) {
                continue;
            }
            let mut view = self.location_view(row, false)?;
            view.distance_km = distance;
            views.push(view);
        }

        if options.sort_by_distance {
            views.sort_by(|a, b| match (a.distance_km, b.distance_km) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
        }
        log::debug!(
            "search ({latitude}, {longitude}) r={radius_km}km: {found} in box, {} returned",
            views.len()
        );
        Ok(views)
    }

    /// Full tree for one location: `categories` with plans and items,
    /// `item_categories` with items only.
    pub fn get_location_detail(&self, shop_code: &str) -> Result<Option<LocationView>, ShopError> {
        match self.repository.find_location_by_code(shop_code)? {
            Some(row) => self.location_view(row, true).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_location_summary(
        &self,
        shop_code: &str,
    ) -> Result<Option<LocationSummaryView>, ShopError> {
        match self.repository.find_location_by_code(shop_code)? {
            Some(row) => self.location_summary(row).map(Some),
            None => Ok(None),
        }
    }

    /// Whether the location lies inside the search box around the center.
    pub fn is_nearby(
        &self,
        shop_code: &str,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<bool, ShopError> {
        let bbox = Nearby::new(latitude, longitude, radius_km).bounding_box()?;
        self.repository.location_in_box(shop_code, &bbox)
    }

    /// Locations carrying a category, optionally limited to a search area.
    pub fn category_locations(
        &self,
        category_id: i64,
        category_type: CategoryType,
        near: Option<Nearby>,
    ) -> Result<Vec<LocationSummaryView>, ShopError> {
        let bbox = near.map(|n| n.bounding_box()).transpose()?;
        let mut views = Vec::new();
        for code in self
            .repository
            .find_category_locations(category_id, category_type)?
        {
            if let Some(bbox) = &bbox {
                if !self.repository.location_in_box(&code, bbox)? {
                    continue;
                }
            }
            if let Some(row) = self.repository.find_location_by_code(&code)? {
                views.push(self.location_summary(row)?);
            }
        }
        Ok(views)
    }

    /// Categories directly below `parent` (0 for the roots).
    pub fn category_list(
        &self,
        parent: i64,
        category_type: CategoryType,
    ) -> Result<Vec<CategorySummaryView>, ShopError> {
        self.repository
            .find_child_categories(parent, category_type)?
            .into_iter()
            .map(|row| {
                let images = self.category_images(&row)?;
                Ok(CategorySummaryView::new(row, images))
            })
            .collect()
    }

    /// The location offering a plan.
    pub fn plan_location(&self, plan_id: &str) -> Result<Option<LocationSummaryView>, ShopError> {
        let Some(plan) = self.repository.find_plan(plan_id)? else {
            return Ok(None);
        };
        self.get_location_summary(&plan.location)
    }

    /// Locations where the member holds active subscriptions, grouped by
    /// plan, in order of first subscription.
    pub fn member_locations(&self, member_id: i64) -> Result<Vec<MemberLocationView>, ShopError> {
        let subscriptions = self.repository.find_member_subscriptions(member_id)?;

        // location -> plan -> subscriptions, first-seen order at each level
        let mut grouped: Vec<(String, Vec<(PlanRow, Vec<SubscriptionLineView>)>)> = Vec::new();
        for subscription in subscriptions.into_iter().filter(|s| s.active) {
            let plan = match grouped
                .iter()
                .flat_map(|(_, plans)| plans.iter())
                .find(|(plan, _)| plan.plan_id == subscription.plan_id)
            {
                Some((plan, _)) => plan.clone(),
                None => match self.repository.find_plan(&subscription.plan_id)? {
                    Some(plan) => plan,
                    None => {
                        log::debug!(
                            "Subscription {} refers to missing plan {}",
                            subscription.subscription_id,
                            subscription.plan_id
                        );
                        continue;
                    }
                },
            };

            let position = match grouped.iter().position(|(code, _)| *code == plan.location) {
                Some(position) => position,
                None => {
                    grouped.push((plan.location.clone(), Vec::new()));
                    grouped.len() - 1
                }
            };
            let images = self.images.resolve(&subscription.item_code, ImageTable::Item)?;
            let line = SubscriptionLineView::new(subscription, images);
            let plans = &mut grouped[position].1;
            match plans.iter_mut().find(|(p, _)| p.plan_id == plan.plan_id) {
                Some((_, lines)) => lines.push(line),
                None => plans.push((plan, vec![line])),
            }
        }

        let mut views = Vec::with_capacity(grouped.len());
        for (code, plans) in grouped {
            let Some(location) = self.get_location_summary(&code)? else {
                continue;
            };
            let plans = plans
                .into_iter()
                .map(|(plan, subscriptions)| {
                    Ok(MemberPlanView {
                        plan: self.plan_view(plan)?,
                        subscriptions,
                    })
                })
                .collect::<Result<Vec<_>, ShopError>>()?;
            views.push(MemberLocationView { location, plans });
        }
        Ok(views)
    }

    fn location_view(&self, row: LocationRow, detail: bool) -> Result<LocationView, ShopError> {
        let code = row.shop_code.clone();
        let images = self.images.resolve(&code, ImageTable::Location)?;
        let mut view = LocationView::new(row, images);

        view.categories = self
            .repository
            .find_categories_for_location(&code, CategoryType::Location)?
            .into_iter()
            .map(|category| self.category_view(&code, category, true))
            .collect::<Result<_, _>>()?;
        if detail {
            view.item_categories = self
                .repository
                .find_categories_for_location(&code, CategoryType::Item)?
                .into_iter()
                .map(|category| self.category_view(&code, category, false))
                .collect::<Result<_, _>>()?;
        }
        Ok(view)
    }

    fn location_summary(&self, row: LocationRow) -> Result<LocationSummaryView, ShopError> {
        let images = self.images.resolve(&row.shop_code, ImageTable::Location)?;
        Ok(LocationSummaryView::new(row, images))
    }

    fn category_view(
        &self,
        code: &str,
        row: CategoryRow,
        with_plans: bool,
    ) -> Result<CategoryView, ShopError> {
        let category_id = row.id;
        let images = self.category_images(&row)?;
        let mut view = CategoryView::new(row, images);
        if with_plans {
            view.plans = self
                .repository
                .find_plans_for_location(code, Some(category_id))?
                .into_iter()
                .map(|plan| self.plan_view(plan))
                .collect::<Result<_, _>>()?;
        }
        view.items = self
            .repository
            .find_items_for_location(code, Some(category_id))?
            .into_iter()
            .map(|item| self.item_view(item))
            .collect::<Result<_, _>>()?;
        Ok(view)
    }

    fn category_images(&self, row: &CategoryRow) -> Result<Vec<ImageRef>, ShopError> {
        self.images.resolve(&row.id.to_string(), ImageTable::Category)
    }

    fn plan_view(&self, row: PlanRow) -> Result<PlanView, ShopError> {
        let images = self.images.resolve(&row.plan_id, ImageTable::Plan)?;
        let items = self.repository.find_plan_items(&row.plan_id)?;
        let item_images = if items.is_empty() {
            Vec::new()
        } else {
            // plan item images are stored against the plan
            self.images.resolve(&row.plan_id, ImageTable::PlanItem)?
        };
        let items = items
            .into_iter()
            .map(|item| PlanItemView::new(item, item_images.clone()))
            .collect();
        Ok(PlanView::new(row, images, items))
    }

    fn item_view(&self, row: ItemRow) -> Result<ItemView, ShopError> {
        let images = self.images.resolve(&row.item_code, ImageTable::Item)?;
        Ok(ItemView::new(row, images))
    }
}

fn location_point(row: &LocationRow) -> Option<GeoPoint> {
    GeoPoint::new(row.latitude.to_f64()?, row.longitude.to_f64()?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::memory::MemoryExecutor;
    use crate::resolver::StoredImageResolver;

    fn seeded() -> MemoryExecutor {
        let executor = MemoryExecutor::new();
        executor.insert("locations", fixtures::location("C002", 6.9000, 79.8600));
        executor.insert("locations", fixtures::location("C001", 6.9275, 79.8612));
        executor.insert("locations", fixtures::location("K001", 7.2906, 80.6337));
        executor
    }

    #[test]
    fn test_search_returns_only_boxed_locations_in_code_order() {
        let executor = seeded();
        let images = StoredImageResolver::new(CatalogRepository::new(&executor), "");
        let assembler = CatalogAssembler::new(CatalogRepository::new(&executor), &images);

        let found = assembler.search_nearby(6.9271, 79.8612, 5.0).unwrap();
        let codes: Vec<&str> = found.iter().map(|l| l.shop_code.as_str()).collect();
        assert_eq!(codes, vec!["C001", "C002"]);
        assert!(found.iter().all(|l| l.distance_km.is_some()));
    }

    #[test]
    fn test_sort_by_distance_puts_nearest_first() {
        let executor = seeded();
        let images = StoredImageResolver::new(CatalogRepository::new(&executor), "");
        let assembler = CatalogAssembler::new(CatalogRepository::new(&executor), &images);

        let options = SearchOptions {
            sort_by_distance: true,
            ..SearchOptions::default()
        };
        let found = assembler
            .search_nearby_with(6.9010, 79.8600, 5.0, options)
            .unwrap();
        assert_eq!(found[0].shop_code, "C002");
    }

    #[test]
    fn test_radius_above_maximum_is_rejected() {
        let executor = seeded();
        let images = StoredImageResolver::new(CatalogRepository::new(&executor), "");
        let assembler = CatalogAssembler::new(CatalogRepository::new(&executor), &images)
            .with_options(SearchOptions::from(&SearchConfig::default()));

        let err = assembler.search_nearby(6.9, 79.8, 500.0).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_missing_location_detail_is_none() {
        let executor = seeded();
        let images = StoredImageResolver::new(CatalogRepository::new(&executor), "");
        let assembler = CatalogAssembler::new(CatalogRepository::new(&executor), &images);
        assert!(assembler.get_location_detail("NOPE").unwrap().is_none());
        assert!(assembler.get_location_summary("NOPE").unwrap().is_none());
    }

    #[test]
    fn test_is_nearby() {
        let executor = seeded();
        let images = StoredImageResolver::new(CatalogRepository::new(&executor), "");
        let assembler = CatalogAssembler::new(CatalogRepository::new(&executor), &images);
        assert!(assembler.is_nearby("C001", 6.9271, 79.8612, 2.0).unwrap());
        assert!(!assembler.is_nearby("K001", 6.9271, 79.8612, 2.0).unwrap());
    }
}
