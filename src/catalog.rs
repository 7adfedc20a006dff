use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Where the detection pipeline gets a price for an auto-added product
pub trait PriceSource: Send + Sync {
    /// Price for a product, or None if the product is not priced
    fn price_for(&self, product_id: &str) -> Option<f64>;
}

/// Catalog entry as stored in `products.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    products: Vec<CatalogEntry>,
}

/// Product catalog keyed by product identifier
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: HashMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        let products = entries
            .into_iter()
            .map(|entry| (entry.id.clone(), entry))
            .collect();
        Catalog { products }
    }

    /// Parse a `{ "products": [...] }` document
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Ok(Catalog::new(file.products))
    }

    /// Load the catalog from disk
    ///
    /// A missing or unreadable file yields an empty catalog and a warning,
    /// so the client still runs without prices.
    ///
    /// # Arguments
    /// * `path` - Path to the products JSON document
    ///
    /// # Returns
    /// * `Catalog` - The loaded catalog (possibly empty)
    ///
    /// # Examples
    /// ```no_run
    /// use smartcart::catalog::{Catalog, PriceSource};
    /// use std::path::Path;
    ///
    /// let catalog = Catalog::load(Path::new("data/products.json"));
    /// match catalog.price_for("1") {
    ///     Some(price) => println!("Product 1 costs {:.2}", price),
    ///     None => eprintln!("Product 1 is not in the catalog"),
    /// }
    /// ```
    pub fn load(path: &Path) -> Self {
        let mut contents = String::new();
        let read = File::open(path).and_then(|mut file| file.read_to_string(&mut contents));
        if let Err(e) = read {
            warn!("Products catalog not found at {}: {}", path.display(), e);
            return Catalog::default();
        }

        match Catalog::from_json(&contents) {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!("Products catalog at {} is invalid: {}", path.display(), e);
                Catalog::default()
            }
        }
    }

    pub fn get(&self, product_id: &str) -> Option<&CatalogEntry> {
        self.products.get(product_id)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

impl PriceSource for Catalog {
    fn price_for(&self, product_id: &str) -> Option<f64> {
        self.get(product_id).map(|entry| entry.price)
    }
}

/// Stand-in pricing for demos without a catalog
///
/// Every product gets a whole-number price in `1..=100`. Never select this
/// for a real store.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderPricing;

impl PriceSource for PlaceholderPricing {
    fn price_for(&self, _product_id: &str) -> Option<f64> {
        let mut rng = rand::thread_rng();
        Some(rng.gen_range(1..=100) as f64)
    }
}
