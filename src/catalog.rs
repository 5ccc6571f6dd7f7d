// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Catalog browsing and privileged product deletion.

use std::sync::Arc;

use crate::api::CatalogApi;
use crate::cache::{query_keys, QueryCache};
use crate::error::CatalogError;
use crate::security::SessionStore;
use crate::types::{Category, DeletedProduct, Product};

/// Catalog operations for the current session.
pub struct CatalogService {
    api: Arc<dyn CatalogApi>,
    cache: Arc<QueryCache>,
    session: Arc<SessionStore>,
}

impl CatalogService {
    pub fn new(api: Arc<dyn CatalogApi>, cache: Arc<QueryCache>, session: Arc<SessionStore>) -> Self {
        Self { api, cache, session }
    }

    pub async fn all_products(&self) -> Result<Vec<Product>, CatalogError> {
        let api = Arc::clone(&self.api);
        Ok(self
            .cache
            .fetch(query_keys::PRODUCTS, || async move { api.products().await })
            .await?)
    }

    pub async fn products_in(&self, category: &str) -> Result<Vec<Product>, CatalogError> {
        let api = Arc::clone(&self.api);
        let slug = category.to_string();
        Ok(self
            .cache
            .fetch(&query_keys::category(category), || async move {
                api.products_by_category(&slug).await
            })
            .await?)
    }

    /// Products of `category`, or all products when `None` (or blank).
    pub async fn products_filtered(&self, category: Option<&str>) -> Result<Vec<Product>, CatalogError> {
        match category.map(str::trim).filter(|c| !c.is_empty()) {
            Some(category) => self.products_in(category).await,
            None => self.all_products().await,
        }
    }

    pub async fn categories(&self) -> Result<Vec<Category>, CatalogError> {
        let api = Arc::clone(&self.api);
        Ok(self
            .cache
            .fetch(query_keys::CATEGORIES, || async move { api.categories().await })
            .await?)
    }

    /// Whether the current session may delete products.
    pub fn can_delete(&self) -> bool {
        self.session.is_privileged()
    }

    /// Delete a product. Only a logged-in privileged user may do this.
    pub async fn delete_product(&self, id: u64) -> Result<DeletedProduct, CatalogError> {
        if !self.can_delete() {
            let user = self.session.username().unwrap_or_else(|| "-".to_string());
            tracing::warn!(target: "catalog", id, user = %user, "Delete refused: not permitted");
            return Err(CatalogError::NotPermitted);
        }

        let deleted = self.api.delete_product(id).await?;
        self.cache.invalidate_prefix(query_keys::PRODUCT_PREFIX);
        tracing::info!(target: "catalog", id, title = %deleted.title, "Product deleted");
        Ok(deleted)
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AuthService;
    use crate::error::{ApiError, LoginError};
    use crate::storage::MemoryStore;
    use crate::types::AuthUser;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn product(id: u64, category: &str) -> Product {
        Product {
            id,
            title: format!("Product {}", id),
            description: String::new(),
            price: 10.0,
            category: category.to_string(),
            thumbnail: None,
            rating: None,
            stock: None,
            brand: None,
        }
    }

    #[derive(Default)]
    struct FakeCatalog {
        product_calls: AtomicUsize,
        deletes: AtomicUsize,
    }

    #[async_trait]
    impl CatalogApi for FakeCatalog {
        async fn products(&self) -> Result<Vec<Product>, ApiError> {
            self.product_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![product(1, "beauty"), product(2, "laptops")])
        }

        async fn products_by_category(&self, slug: &str) -> Result<Vec<Product>, ApiError> {
            Ok(vec![product(2, slug)])
        }

        async fn categories(&self) -> Result<Vec<Category>, ApiError> {
            Ok(vec![Category {
                slug: "laptops".into(),
                name: "Laptops".into(),
                url: None,
            }])
        }

        async fn delete_product(&self, id: u64) -> Result<DeletedProduct, ApiError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(DeletedProduct {
                id,
                title: format!("Product {}", id),
                is_deleted: true,
                deleted_on: None,
            })
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl AuthService for AcceptAll {
        async fn login(&self, username: &str, _p: &str) -> Result<AuthUser, LoginError> {
            Ok(AuthUser {
                username: username.to_string(),
                access_token: Some("tok".into()),
                ..AuthUser::default()
            })
        }

        async fn validate(&self, _token: &str) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn service() -> (CatalogService, Arc<FakeCatalog>, Arc<SessionStore>) {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(FakeCatalog::default());
        let cache = Arc::new(QueryCache::load(store.clone()));
        let session = Arc::new(SessionStore::new(store, Arc::new(AcceptAll)));
        (CatalogService::new(api.clone(), cache, session.clone()), api, session)
    }

    #[tokio::test]
    async fn test_filtering() {
        let (catalog, _, _) = service();
        assert_eq!(catalog.products_filtered(None).await.unwrap().len(), 2);
        assert_eq!(catalog.products_filtered(Some(" ")).await.unwrap().len(), 2);

        let laptops = catalog.products_filtered(Some("laptops")).await.unwrap();
        assert_eq!(laptops.len(), 1);
        assert_eq!(laptops[0].category, "laptops");
        assert!(catalog.cache().contains("products/category/laptops"));
    }

    #[tokio::test]
    async fn test_listings_are_cached() {
        let (catalog, api, _) = service();
        catalog.all_products().await.unwrap();
        catalog.all_products().await.unwrap();
        assert_eq!(api.product_calls.load(Ordering::SeqCst), 1);
        assert_eq!(catalog.categories().await.unwrap()[0].slug, "laptops");
    }

    #[tokio::test]
    async fn test_delete_requires_privilege() {
        let (catalog, api, session) = service();
        assert_eq!(catalog.delete_product(1).await.unwrap_err(), CatalogError::NotPermitted);

        session.login("emilys", "emilyspass").await.unwrap();
        assert_eq!(catalog.delete_product(1).await.unwrap_err(), CatalogError::NotPermitted);
        assert_eq!(api.deletes.load(Ordering::SeqCst), 0);

        session.login("michaelw", "michaelwpass").await.unwrap();
        assert!(catalog.delete_product(1).await.unwrap().is_deleted);

        session.logout();
        assert_eq!(catalog.delete_product(1).await.unwrap_err(), CatalogError::NotPermitted);
    }

    #[tokio::test]
    async fn test_delete_invalidates_listings() {
        let (catalog, api, session) = service();
        session.login("michaelw", "michaelwpass").await.unwrap();

        catalog.all_products().await.unwrap();
        catalog.delete_product(2).await.unwrap();
        catalog.all_products().await.unwrap();
        assert_eq!(api.product_calls.load(Ordering::SeqCst), 2);
    }
}
