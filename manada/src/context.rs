use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Catalog data every virtual user needs but no single user should re-derive:
/// filter facets, sort options and entry points discovered on the target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub category_urls: Vec<String>,
    pub product_numbers: Vec<String>,
    pub property_ids: Vec<String>,
    pub manufacturer_ids: Vec<String>,
    pub sortings: Vec<String>,
    pub search_keywords: Vec<String>,
}

/// Process-wide, read-mostly state shared by every virtual user.
///
/// One `SharedContext` is created by the caller and handed to the scheduler, which
/// passes it by reference into each run-loop. Each lazily populated field is a
/// `OnceLock`: the first initializer wins and every later reader sees the same
/// value, so there is no mutation after population.
#[derive(Debug)]
pub struct SharedContext {
    base_url: String,
    catalog: OnceLock<Catalog>,
    admin_token: OnceLock<String>,
}

impl SharedContext {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            catalog: OnceLock::new(),
            admin_token: OnceLock::new(),
        }
    }

    /// Context with the catalog populated up front (explicit init phase).
    pub fn with_catalog(base_url: impl Into<String>, catalog: Catalog) -> Self {
        let ctx = Self::new(base_url);
        let _ = ctx.catalog.set(catalog);
        ctx
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path on the target.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// The catalog, if it has been populated yet.
    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.get()
    }

    /// Populate the catalog once. Returns `false` if it was already set, in which
    /// case `catalog` is dropped and the first value is kept.
    pub fn set_catalog(&self, catalog: Catalog) -> bool {
        self.catalog.set(catalog).is_ok()
    }

    /// Return the catalog, deriving it with `init` if nobody has yet.
    pub fn catalog_or_init(&self, init: impl FnOnce() -> Catalog) -> &Catalog {
        self.catalog.get_or_init(init)
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.admin_token.get().map(String::as_str)
    }

    pub fn set_admin_token(&self, token: impl Into<String>) -> bool {
        self.admin_token.set(token.into()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_population_wins() {
        let ctx = SharedContext::new("http://shop.test/");
        assert!(ctx.catalog().is_none());

        let first = Catalog {
            sortings: vec!["name-asc".into()],
            ..Default::default()
        };
        assert!(ctx.set_catalog(first.clone()));
        assert!(!ctx.set_catalog(Catalog::default()));
        assert_eq!(ctx.catalog(), Some(&first));
        assert_eq!(ctx.catalog_or_init(Catalog::default), &first);
    }

    #[test]
    fn builds_urls_from_trimmed_base() {
        let ctx = SharedContext::new("http://shop.test/");
        assert_eq!(ctx.base_url(), "http://shop.test");
        assert_eq!(ctx.url("/account"), "http://shop.test/account");
        assert_eq!(ctx.url("search?q=x"), "http://shop.test/search?q=x");
    }
}
