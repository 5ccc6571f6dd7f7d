// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Canonical types used across catalock.
//!
//! Wire types mirror the JSON returned by the catalog API. Fields the
//! client never reads are still deserialized when present so cached
//! blobs round-trip without loss.

use serde::{Deserialize, Serialize};

/// A product from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub stock: Option<u32>,
    #[serde(default)]
    pub brand: Option<String>,
}

/// Paged product listing as returned by `/products` and
/// `/products/category/{slug}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductPage {
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub skip: u64,
    #[serde(default)]
    pub limit: u64,
}

/// A product category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Response body of a successful `DELETE /products/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedProduct {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_on: Option<String>,
}

/// Authenticated user returned by `POST /auth/login`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

/// App foreground state as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppLifecycleState {
    Active,
    Inactive,
    Background,
}

impl AppLifecycleState {
    /// True for the states the app can be in after leaving the foreground.
    pub fn is_away(&self) -> bool {
        matches!(self, Self::Inactive | Self::Background)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Background => "background",
        }
    }
}

impl std::fmt::Display for AppLifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AppLifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "background" => Ok(Self::Background),
            other => Err(format!("unknown lifecycle state: {}", other)),
        }
    }
}

/// Navigation routes of the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Route {
    Login,
    MainTabs,
    AllProducts,
    AllCategories,
    SpecificCategory { category: String },
}

impl Route {
    /// Route name without parameters. Used for matching the sensitive
    /// screen from configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Route::Login => "Login",
            Route::MainTabs => "MainTabs",
            Route::AllProducts => "AllProducts",
            Route::AllCategories => "AllCategories",
            Route::SpecificCategory { .. } => "SpecificCategory",
        }
    }

    /// Parse a parameterless route name.
    pub fn from_name(name: &str) -> Option<Route> {
        match name {
            "Login" => Some(Route::Login),
            "MainTabs" => Some(Route::MainTabs),
            "AllProducts" => Some(Route::AllProducts),
            "AllCategories" => Some(Route::AllCategories),
            _ => None,
        }
    }

    pub fn title(&self) -> String {
        match self {
            Route::Login => "Login".to_string(),
            Route::MainTabs => "Home".to_string(),
            Route::AllProducts => "All Products".to_string(),
            Route::AllCategories => "Categories".to_string(),
            Route::SpecificCategory { category } => format!("Category: {}", category),
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::SpecificCategory { category } => write!(f, "SpecificCategory({})", category),
            other => write!(f, "{}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_page_parses_api_shape() {
        let body = r#"{
            "products": [
                {"id": 1, "title": "Essence Mascara", "price": 9.99, "category": "beauty",
                 "thumbnail": "https://cdn.example/1.png", "discountPercentage": 7.17}
            ],
            "total": 194, "skip": 0, "limit": 30
        }"#;
        let page: ProductPage = serde_json::from_str(body).unwrap();
        assert_eq!(page.products.len(), 1);
        assert_eq!(page.products[0].category, "beauty");
        assert_eq!(page.total, 194);
    }

    #[test]
    fn test_auth_user_reads_access_token() {
        let body = r#"{"id": 1, "username": "emilys", "firstName": "Emily", "accessToken": "abc"}"#;
        let user: AuthUser = serde_json::from_str(body).unwrap();
        assert_eq!(user.access_token.as_deref(), Some("abc"));
        assert_eq!(user.first_name.as_deref(), Some("Emily"));
    }

    #[test]
    fn test_lifecycle_is_away() {
        assert!(!AppLifecycleState::Active.is_away());
        assert!(AppLifecycleState::Inactive.is_away());
        assert!(AppLifecycleState::Background.is_away());
        assert_eq!("Background".parse::<AppLifecycleState>(), Ok(AppLifecycleState::Background));
        assert!("sleeping".parse::<AppLifecycleState>().is_err());
    }

    #[test]
    fn test_route_names() {
        assert_eq!(Route::from_name("AllProducts"), Some(Route::AllProducts));
        assert_eq!(Route::from_name("SpecificCategory"), None);
        let route = Route::SpecificCategory { category: "laptops".to_string() };
        assert_eq!(route.name(), "SpecificCategory");
        assert_eq!(route.to_string(), "SpecificCategory(laptops)");
    }
}
