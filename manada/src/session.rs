//! Per-user mutable state.
//!
//! A [`SessionState`] is created when a run-loop starts, is mutated only by the
//! actions that run-loop invokes, and is dropped when the run-loop ends. It is
//! never shared, which is why none of its methods need synchronization.
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Product identity used for cart merging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductRef(pub String);

impl From<&str> for ProductRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProductRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product: ProductRef,
    pub quantity: u32,
}

/// An account registered by this session, kept across logout so the user can log in again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// What a successful checkout submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub lines: Vec<CartLine>,
    pub customer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub user_id: usize,
    /// Current listing/search page or page URL.
    pub cursor: Option<String>,
    pub page: u32,
    /// Products visible on the current page.
    pub in_view: Vec<ProductRef>,
    pub filters: Vec<String>,
    pub sorting: Option<String>,
    requires_auth: bool,
    cart: Vec<CartLine>,
    credentials: Option<Credentials>,
    auth_token: Option<String>,
    customer_id: Option<String>,
    orders_placed: u32,
}

impl SessionState {
    pub fn new(user_id: usize) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    /// Session of an archetype whose checkout is only allowed when logged in.
    pub fn requiring_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    pub fn cart(&self) -> &[CartLine] {
        &self.cart
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn customer_id(&self) -> Option<&str> {
        self.customer_id.as_deref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    pub fn orders_placed(&self) -> u32 {
        self.orders_placed
    }

    /// Navigate to a new page, replacing what is in view.
    pub fn visit(&mut self, cursor: impl Into<String>, page: u32, in_view: Vec<ProductRef>) {
        self.cursor = Some(cursor.into());
        self.page = page;
        self.in_view = in_view;
    }

    /// Add `qty` of `product`. An existing line for the same product is incremented
    /// instead of duplicated.
    pub fn add_to_cart(&mut self, product: impl Into<ProductRef>, qty: u32) -> Result<(), SessionError> {
        if qty == 0 {
            return Err(SessionError::InvalidQuantity);
        }
        let product = product.into();
        match self.cart.iter_mut().find(|line| line.product == product) {
            Some(line) => line.quantity = line.quantity.saturating_add(qty),
            None => self.cart.push(CartLine { product, quantity: qty }),
        }
        Ok(())
    }

    /// Submit the cart. On success the cart is always left empty so a retried or
    /// repeated checkout can never submit the same lines twice.
    pub fn checkout(&mut self) -> Result<Order, SessionError> {
        if self.cart.is_empty() {
            return Err(SessionError::EmptyCart);
        }
        if self.requires_auth && self.auth_token.is_none() {
            return Err(SessionError::NotAuthenticated);
        }
        let lines = std::mem::take(&mut self.cart);
        self.orders_placed += 1;
        Ok(Order {
            lines,
            customer: self.customer_id.clone(),
        })
    }

    /// Store a freshly registered account and the session it opened.
    pub fn register(&mut self, credentials: Credentials, token: impl Into<String>, customer_id: impl Into<String>) {
        self.credentials = Some(credentials);
        self.auth_token = Some(token.into());
        self.customer_id = Some(customer_id.into());
    }

    /// Log in with the previously registered account.
    pub fn login(&mut self, token: impl Into<String>, customer_id: impl Into<String>) -> Result<(), SessionError> {
        if self.credentials.is_none() {
            return Err(SessionError::NoAccount);
        }
        self.auth_token = Some(token.into());
        self.customer_id = Some(customer_id.into());
        Ok(())
    }

    /// Drop the credential and every per-session identifier. The registered account
    /// is kept so that a later `login` can reuse it.
    pub fn logout(&mut self) {
        self.auth_token = None;
        self.customer_id = None;
        self.cart.clear();
        self.filters.clear();
        self.sorting = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            email: "vu-1@example.test".into(),
            password: "shopware".into(),
        }
    }

    #[test]
    fn same_product_merges_quantities() {
        let mut s = SessionState::new(1);
        s.add_to_cart("SW-1", 2).unwrap();
        s.add_to_cart("SW-1", 3).unwrap();
        assert_eq!(
            s.cart(),
            &[CartLine {
                product: "SW-1".into(),
                quantity: 5
            }]
        );
    }

    #[test]
    fn distinct_products_keep_insertion_order() {
        let mut s = SessionState::new(1);
        s.add_to_cart("SW-2", 1).unwrap();
        s.add_to_cart("SW-1", 1).unwrap();
        s.add_to_cart("SW-2", 1).unwrap();
        let products: Vec<_> = s.cart().iter().map(|l| l.product.0.as_str()).collect();
        assert_eq!(products, ["SW-2", "SW-1"]);
        assert_eq!(s.cart()[0].quantity, 2);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut s = SessionState::new(1);
        assert_eq!(s.add_to_cart("SW-1", 0), Err(SessionError::InvalidQuantity));
        assert!(s.cart().is_empty());
    }

    #[test]
    fn checkout_empties_the_cart() {
        for lines in 1..5 {
            let mut s = SessionState::new(1);
            for i in 0..lines {
                s.add_to_cart(format!("SW-{i}"), i + 1).unwrap();
            }
            let order = s.checkout().unwrap();
            assert_eq!(order.lines.len(), lines as usize);
            assert!(s.cart().is_empty());
            // a second submit has nothing left to send
            assert_eq!(s.checkout(), Err(SessionError::EmptyCart));
        }
    }

    #[test]
    fn checkout_requiring_auth_keeps_cart_when_rejected() {
        let mut s = SessionState::new(1).requiring_auth();
        s.add_to_cart("SW-1", 1).unwrap();
        assert_eq!(s.checkout(), Err(SessionError::NotAuthenticated));
        assert_eq!(s.cart().len(), 1);

        s.register(creds(), "ctx-token", "customer-1");
        let order = s.checkout().unwrap();
        assert_eq!(order.customer.as_deref(), Some("customer-1"));
        assert!(s.cart().is_empty());
        assert_eq!(s.orders_placed(), 1);
    }

    #[test]
    fn logout_then_login_starts_clean() {
        let mut s = SessionState::new(1);
        assert_eq!(s.login("t", "c"), Err(SessionError::NoAccount));

        s.register(creds(), "token-1", "customer-1");
        s.add_to_cart("SW-1", 1).unwrap();
        s.sorting = Some("price-asc".into());
        s.logout();

        assert!(!s.is_authenticated());
        assert_eq!(s.customer_id(), None);
        assert!(s.cart().is_empty());
        assert_eq!(s.sorting, None);
        assert_eq!(s.credentials(), Some(&creds()));

        s.login("token-2", "customer-1").unwrap();
        assert_eq!(s.auth_token(), Some("token-2"));
    }
}
