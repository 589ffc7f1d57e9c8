//! A storefront population: browsing visitors, ordering customers, advertisement
//! followers and admin API writers, all against one shop.
//!
//! ```sh
//! MANADA_HOST=http://localhost:8000 MANADA_POPULATION=50 MANADA_RAMP_UP_SECS=20 \
//!     cargo run --example storefront
//! ```
use std::sync::Arc;

use async_trait::async_trait;
use manada::{
    Action, ActionError, ActionRegistry, Archetype, Catalog, Credentials, LoadConfig, ProductRef,
    Scenario, Selection, SessionState, SharedContext, StdoutReporter, Task, WaitTime,
};
use rand::seq::IndexedRandom;
use reqwest::{Client, Response};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy)]
enum Page {
    Listing,
    Search,
    Account,
    SurfListing,
    SurfSearch,
    Register,
    Login,
    Logout,
    AddProductsToCart,
    InstantOrder,
    FollowAdvertisement,
    ImportProducts,
    UpdateStock,
    UpdatePrices,
}

/// Every storefront action shares one HTTP client; `page` picks the flow.
struct Storefront {
    client: Client,
    page: Page,
}

#[async_trait]
impl Action for Storefront {
    async fn invoke(
        &self,
        session: &mut SessionState,
        ctx: &SharedContext,
        repeat: u32,
    ) -> Result<(), ActionError> {
        match self.page {
            Page::Listing => self.listing(session, ctx).await,
            Page::Search => self.search(session, ctx).await,
            Page::Account => self.get(ctx, "/account").await.map(drop),
            Page::SurfListing => self.surf_listing(session, ctx).await,
            Page::SurfSearch => self.surf_search(session, ctx).await,
            Page::Register => self.register(session, ctx).await,
            Page::Login => self.login(session, ctx).await,
            Page::Logout => self.logout(session, ctx).await,
            Page::AddProductsToCart => {
                for _ in 0..repeat {
                    self.add_product_to_cart(session, ctx).await?;
                }
                Ok(())
            }
            Page::InstantOrder => self.instant_order(session, ctx).await,
            Page::FollowAdvertisement => {
                self.register(session, ctx).await?;
                self.add_advertisement(session, ctx).await?;
                self.instant_order(session, ctx).await?;
                self.logout(session, ctx).await
            }
            Page::ImportProducts => self.admin_sync(ctx, "product", repeat).await,
            Page::UpdateStock => self.admin_sync(ctx, "stock", repeat).await,
            Page::UpdatePrices => self.admin_sync(ctx, "price", repeat).await,
        }
    }
}

impl Storefront {
    async fn listing(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        self.go_to_listing(s, ctx).await?;
        self.view_products(s, ctx, 2).await?;
        self.go_to_next_page(s, ctx).await?;
        self.view_products(s, ctx, 2).await?;
        self.select_sorting(s, ctx).await?;
        self.add_property_filter(s, ctx).await?;
        self.view_products(s, ctx, 1).await?;
        self.go_to_next_page(s, ctx).await?;
        self.do_search(s, ctx).await?;
        self.view_products(s, ctx, 2).await?;
        self.add_property_filter(s, ctx).await?;
        self.view_products(s, ctx, 3).await?;
        self.go_to_next_page(s, ctx).await
    }

    async fn search(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        self.do_search(s, ctx).await?;
        self.view_products(s, ctx, 2).await?;
        self.go_to_next_page(s, ctx).await?;
        self.view_products(s, ctx, 2).await?;
        self.go_to_next_page(s, ctx).await?;
        self.add_manufacturer_filter(s, ctx).await?;
        self.select_sorting(s, ctx).await?;
        self.view_products(s, ctx, 3).await
    }

    async fn surf_listing(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        self.go_to_listing(s, ctx).await?;
        self.view_products(s, ctx, 2).await?;
        self.add_product_to_cart(s, ctx).await?;
        self.go_to_next_page(s, ctx).await?;
        self.view_products(s, ctx, 2).await?;
        self.add_product_to_cart(s, ctx).await?;
        self.select_sorting(s, ctx).await?;
        self.add_property_filter(s, ctx).await?;
        self.view_products(s, ctx, 1).await?;
        self.go_to_next_page(s, ctx).await?;
        self.add_product_to_cart(s, ctx).await?;
        self.instant_order(s, ctx).await
    }

    async fn surf_search(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        self.do_search(s, ctx).await?;
        self.view_products(s, ctx, 2).await?;
        self.add_property_filter(s, ctx).await?;
        self.view_products(s, ctx, 3).await?;
        for _ in 0..2 {
            self.add_product_to_cart(s, ctx).await?;
        }
        self.go_to_next_page(s, ctx).await?;
        self.view_products(s, ctx, 2).await?;
        for _ in 0..3 {
            self.add_product_to_cart(s, ctx).await?;
        }
        self.instant_order(s, ctx).await
    }

    async fn go_to_listing(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        let url = pick(&catalog(ctx).category_urls).unwrap_or_else(|| "/".to_string());
        self.get(ctx, &url).await?;
        s.filters.clear();
        s.sorting = None;
        s.visit(url, 1, visible_products(ctx));
        Ok(())
    }

    async fn do_search(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        let term = pick(&catalog(ctx).search_keywords).unwrap_or_else(|| "shirt".to_string());
        let url = format!("/search?search={term}");
        self.get(ctx, &url).await?;
        s.filters.clear();
        s.visit(url, 1, visible_products(ctx));
        Ok(())
    }

    async fn go_to_next_page(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        let Some(cursor) = s.cursor.clone() else {
            return self.go_to_listing(s, ctx).await;
        };
        let page = s.page + 1;
        self.get(ctx, &self.listing_url(s, &cursor, page)).await?;
        s.visit(cursor, page, visible_products(ctx));
        Ok(())
    }

    async fn select_sorting(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        s.sorting = pick(&catalog(ctx).sortings);
        self.refresh(s, ctx).await
    }

    async fn add_property_filter(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        if let Some(id) = pick(&catalog(ctx).property_ids) {
            s.filters.push(format!("properties={id}"));
        }
        self.refresh(s, ctx).await
    }

    async fn add_manufacturer_filter(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        if let Some(id) = pick(&catalog(ctx).manufacturer_ids) {
            s.filters.push(format!("manufacturer={id}"));
        }
        self.refresh(s, ctx).await
    }

    async fn refresh(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        let Some(cursor) = s.cursor.clone() else {
            return self.go_to_listing(s, ctx).await;
        };
        self.get(ctx, &self.listing_url(s, &cursor, 1)).await?;
        s.visit(cursor, 1, visible_products(ctx));
        Ok(())
    }

    async fn view_products(&self, s: &mut SessionState, ctx: &SharedContext, n: usize) -> Result<(), ActionError> {
        let products: Vec<ProductRef> = s.in_view.iter().take(n).cloned().collect();
        for product in products {
            self.get(ctx, &format!("/detail/{}", product.0)).await?;
        }
        Ok(())
    }

    async fn add_product_to_cart(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        let product = s
            .in_view
            .first()
            .cloned()
            .or_else(|| pick(&catalog(ctx).product_numbers).map(ProductRef::from))
            .ok_or_else(|| ActionError::other("catalog", "no product to add"))?;
        let body = json!({ "lineItems": [{ "id": product.0, "quantity": 1 }] });
        self.post(ctx, "/checkout/line-item/add", s, &body).await?;
        s.add_to_cart(product, 1)?;
        Ok(())
    }

    async fn add_advertisement(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        self.get(ctx, "/campaign").await?;
        s.visit("/campaign", 1, visible_products(ctx));
        self.add_product_to_cart(s, ctx).await
    }

    async fn instant_order(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        self.get(ctx, "/checkout/confirm").await?;
        let order = s.checkout()?;
        let body = json!({
            "tos": "on",
            "lines": order.lines.iter().map(|l| json!({ "id": l.product.0, "quantity": l.quantity })).collect::<Vec<_>>(),
        });
        self.post(ctx, "/checkout/order", s, &body).await?;
        Ok(())
    }

    async fn register(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        let credentials = Credentials {
            email: format!("vu-{}-{}@example.com", s.user_id, rand::random::<u32>()),
            password: "shopware".to_string(),
        };
        let body = json!({
            "email": credentials.email,
            "password": credentials.password,
            "firstName": "Load",
            "lastName": "Test",
        });
        let res = self.post(ctx, "/account/register", s, &body).await?;
        let (token, customer) = session_ids(&res);
        s.register(credentials, token, customer);
        Ok(())
    }

    async fn login(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        let credentials = s
            .credentials()
            .cloned()
            .ok_or(manada::SessionError::NoAccount)?;
        let body = json!({ "username": credentials.email, "password": credentials.password });
        let res = self.post(ctx, "/account/login", s, &body).await?;
        let (token, customer) = session_ids(&res);
        s.login(token, customer)?;
        Ok(())
    }

    async fn logout(&self, s: &mut SessionState, ctx: &SharedContext) -> Result<(), ActionError> {
        self.get(ctx, "/account/logout").await?;
        s.logout();
        Ok(())
    }

    async fn admin_sync(&self, ctx: &SharedContext, entity: &str, n: u32) -> Result<(), ActionError> {
        let token = ctx
            .admin_token()
            .ok_or_else(|| ActionError::other("auth", "no admin token"))?;
        let payload: Vec<_> = (0..n)
            .filter_map(|_| pick(&catalog(ctx).product_numbers))
            .map(|number| json!({ "productNumber": number, "entity": entity }))
            .collect();
        let mut body = serde_json::Map::new();
        body.insert(entity.to_string(), json!({ "action": "upsert", "payload": payload }));
        let res = self
            .client
            .post(ctx.url("/api/_action/sync"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ActionError::transport(e.to_string()))?;
        check(res).await.map(|_| ())
    }

    fn listing_url(&self, s: &SessionState, cursor: &str, page: u32) -> String {
        let sep = if cursor.contains('?') { '&' } else { '?' };
        let mut url = format!("{cursor}{sep}p={page}");
        if let Some(order) = &s.sorting {
            url.push_str(&format!("&order={order}"));
        }
        for filter in &s.filters {
            url.push('&');
            url.push_str(filter);
        }
        url
    }

    async fn get(&self, ctx: &SharedContext, path: &str) -> Result<serde_json::Value, ActionError> {
        let res = self
            .client
            .get(ctx.url(path))
            .send()
            .await
            .map_err(|e| ActionError::transport(e.to_string()))?;
        check(res).await
    }

    async fn post(
        &self,
        ctx: &SharedContext,
        path: &str,
        s: &SessionState,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let mut req = self.client.post(ctx.url(path)).json(body);
        if let Some(token) = s.auth_token() {
            req = req.header("sw-context-token", token);
        }
        let res = req
            .send()
            .await
            .map_err(|e| ActionError::transport(e.to_string()))?;
        check(res).await
    }
}

async fn check(res: Response) -> Result<serde_json::Value, ActionError> {
    let status = res.status();
    if !status.is_success() {
        return Err(ActionError::status(status.as_u16()));
    }
    // storefront pages answer with HTML; only API responses carry JSON
    Ok(res.json().await.unwrap_or(serde_json::Value::Null))
}

fn session_ids(res: &serde_json::Value) -> (String, String) {
    let token = res["contextToken"].as_str().unwrap_or_default().to_string();
    let customer = res["id"].as_str().unwrap_or_default().to_string();
    (token, customer)
}

fn catalog(ctx: &SharedContext) -> &Catalog {
    ctx.catalog_or_init(Catalog::default)
}

fn pick(items: &[String]) -> Option<String> {
    items.choose(&mut rand::rng()).cloned()
}

fn visible_products(ctx: &SharedContext) -> Vec<ProductRef> {
    let numbers = &catalog(ctx).product_numbers;
    numbers
        .choose_multiple(&mut rand::rng(), 24)
        .map(|n| ProductRef::from(n.as_str()))
        .collect()
}

fn demo_catalog() -> Catalog {
    Catalog {
        category_urls: vec!["/Clothing/".into(), "/Home-Garden/".into(), "/Sports/".into()],
        product_numbers: (1..=200).map(|i| format!("SW{i:05}")).collect(),
        property_ids: vec!["red".into(), "blue".into(), "xl".into(), "cotton".into()],
        manufacturer_ids: vec!["shopware".into(), "acme".into()],
        sortings: vec!["name-asc".into(), "price-asc".into(), "price-desc".into(), "topseller".into()],
        search_keywords: vec!["shirt".into(), "steel".into(), "cotton".into(), "lamp".into()],
    }
}

fn archetypes() -> Vec<Archetype> {
    let browsing = WaitTime::between_secs(2, 5).unwrap_or_default();
    vec![
        Archetype::builder()
            .name("visitor")
            .weight(10.0)
            .wait_time(browsing)
            .tasks(vec![Task::new("listing").weight(3.0), Task::new("search").weight(2.0)])
            .build(),
        Archetype::builder()
            .name("surf_with_order")
            .weight(6.0)
            .wait_time(browsing)
            .selection(Selection::Sequential)
            .tasks(vec![
                Task::new("register"),
                Task::new("account"),
                Task::new("surf_listing"),
                Task::new("surf_search"),
                Task::new("logout"),
            ])
            .build(),
        Archetype::builder()
            .name("fast_order")
            .weight(4.0)
            .on_start(vec![Task::new("register"), Task::new("logout")])
            .tasks(vec![Task::new("order")])
            .requires_auth(true)
            .build(),
        Archetype::builder()
            .name("advertisement")
            .weight(2.0)
            .tasks(vec![Task::new("follow_advertisement")])
            .build(),
        Archetype::builder()
            .name("api_imports")
            .weight(1.0)
            .tasks(vec![Task::new("import_products").repeat(10)])
            .build(),
        Archetype::builder()
            .name("api_stock")
            .weight(1.0)
            .tasks(vec![Task::new("update_stock").repeat(25)])
            .build(),
        Archetype::builder()
            .name("api_prices")
            .weight(1.0)
            .tasks(vec![Task::new("update_prices").repeat(15)])
            .build(),
    ]
}

/// `fast_order` runs login, three cart additions, checkout and logout as one task.
struct Sequence(Vec<(Storefront, u32)>);

#[async_trait]
impl Action for Sequence {
    async fn invoke(&self, session: &mut SessionState, ctx: &SharedContext, _repeat: u32) -> Result<(), ActionError> {
        for (step, repeat) in &self.0 {
            step.invoke(session, ctx, *repeat).await?;
        }
        Ok(())
    }
}

fn registry(client: &Client) -> Result<ActionRegistry, manada::ConfigError> {
    let page = |page| Storefront {
        client: client.clone(),
        page,
    };
    let mut registry = ActionRegistry::new();
    registry
        .register("listing", page(Page::Listing))?
        .register("search", page(Page::Search))?
        .register("account", page(Page::Account))?
        .register("surf_listing", page(Page::SurfListing))?
        .register("surf_search", page(Page::SurfSearch))?
        .register("register", page(Page::Register))?
        .register("login", page(Page::Login))?
        .register("logout", page(Page::Logout))?
        .register("add_products_to_cart", page(Page::AddProductsToCart))?
        .register("instant_order", page(Page::InstantOrder))?
        .register(
            "order",
            Sequence(vec![
                (page(Page::Login), 1),
                (page(Page::AddProductsToCart), 3),
                (page(Page::InstantOrder), 1),
                (page(Page::Logout), 1),
            ]),
        )?
        .register("follow_advertisement", page(Page::FollowAdvertisement))?
        .register("import_products", page(Page::ImportProducts))?
        .register("update_stock", page(Page::UpdateStock))?
        .register("update_prices", page(Page::UpdatePrices))?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("manada=info")),
        )
        .init();

    let config = LoadConfig::from_env()?;
    // NEVER build clients inside actions, every virtual user shares this one
    let client = Client::builder().build()?;

    let mut scenario = Scenario::from_config("storefront", &config, archetypes(), registry(&client)?)
        .with_reporter(StdoutReporter);
    scenario.context = Arc::new(SharedContext::with_catalog(config.host.clone(), demo_catalog()));
    if let Ok(token) = std::env::var("MANADA_ADMIN_TOKEN") {
        scenario.context.set_admin_token(token);
    }

    let summary = scenario.run().await?;
    println!(
        "completed: {}, setup failed: {}, cancelled: {}, never launched: {}",
        summary.completed, summary.setup_failed, summary.cancelled, summary.not_launched
    );
    Ok(())
}
