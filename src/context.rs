use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::{AuthApi, AuthStore, HttpAuthApi};
use crate::cart::SharedCart;
use crate::catalog::{Catalog, PlaceholderPricing, PriceSource};
use crate::config::{FeedConfig, PricingPolicy};
use crate::error::StorageError;
use crate::feed::FeedClient;
use crate::storage::{FileStore, KeyValueStore};

/// Everything a front end needs, constructed once and passed around
///
/// Holds the shared cart, the auth store and the price source. Tests build
/// their own isolated instances with [`AppContext::new`].
#[derive(Clone)]
pub struct AppContext {
    pub config: FeedConfig,
    pub cart: SharedCart,
    pub auth: Arc<Mutex<AuthStore>>,
    pub pricing: Arc<dyn PriceSource>,
}

impl AppContext {
    pub fn new(
        config: FeedConfig,
        store: Arc<dyn KeyValueStore>,
        api: Arc<dyn AuthApi>,
        pricing: Arc<dyn PriceSource>,
    ) -> Self {
        AppContext {
            config,
            cart: SharedCart::default(),
            auth: Arc::new(Mutex::new(AuthStore::load(store, api))),
            pricing,
        }
    }

    /// Wire the context from configuration: file-backed state, HTTP auth
    /// and the configured pricing policy
    ///
    /// # Errors
    /// * Returns a `StorageError` if the state directory cannot be created
    pub fn from_config(config: FeedConfig) -> Result<Self, StorageError> {
        let store = Arc::new(FileStore::open(&config.state_dir)?);
        let api = Arc::new(HttpAuthApi::new(&config.api_url));
        let pricing: Arc<dyn PriceSource> = match config.pricing {
            PricingPolicy::Catalog => Arc::new(Catalog::load(&config.catalog_path)),
            PricingPolicy::Placeholder => {
                log::warn!("Using placeholder pricing; prices are random");
                Arc::new(PlaceholderPricing)
            }
        };

        Ok(AppContext::new(config, store, api, pricing))
    }

    /// A feed client bound to this context's cart and pricing
    pub fn feed_client(&self, session_id: &str) -> FeedClient {
        FeedClient::new(
            session_id,
            self.config.clone(),
            self.cart.clone(),
            self.pricing.clone(),
        )
    }
}
