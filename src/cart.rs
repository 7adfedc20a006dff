use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// A product as offered to the cart
///
/// Carries at least the identifier, display name and unit price. Products
/// added by the detection pipeline also carry the recognition confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Product identifier (unique within a cart)
    pub id: String,

    /// Display name
    pub name: String,

    /// Unit price
    pub price: f64,

    /// Recognition confidence, when the product came from a detection
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl Product {
    pub fn new(id: &str, name: &str, price: f64) -> Self {
        Product {
            id: id.to_string(),
            name: name.to_string(),
            price,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// One line of the cart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub quantity: u32,
    pub confidence: Option<f64>,
}

impl CartLine {
    pub fn subtotal(&self) -> f64 {
        self.price * self.quantity as f64
    }
}

/// In-memory cart state
///
/// Lines are kept in insertion order. Identifiers are unique: adding a known
/// identifier bumps its quantity and keeps the first-seen name and price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    items: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self {
        Cart { items: Vec::new() }
    }

    /// Add one unit of a product
    ///
    /// # Arguments
    /// * `product` - The product to add
    ///
    /// If a line with the same identifier exists its quantity is incremented
    /// by one; name and price of the existing line are left untouched.
    /// Otherwise a new line with quantity 1 is appended.
    pub fn add_item(&mut self, product: Product) {
        if let Some(line) = self.items.iter_mut().find(|line| line.id == product.id) {
            line.quantity += 1;
            return;
        }

        self.items.push(CartLine {
            id: product.id,
            name: product.name,
            price: product.price,
            quantity: 1,
            confidence: product.confidence,
        });
    }

    /// Remove a line; absent identifiers are ignored
    pub fn remove_item(&mut self, id: &str) {
        self.items.retain(|line| line.id != id);
    }

    /// Set a line's quantity to `max(0, quantity)`
    ///
    /// A zero quantity is stored as is. Use [`Cart::change_quantity`] when a
    /// line reaching zero should disappear.
    ///
    /// # Arguments
    /// * `id` - Identifier of the line to update (no-op if absent)
    /// * `quantity` - The new quantity; negative values clamp to 0
    pub fn update_quantity(&mut self, id: &str, quantity: i64) {
        if let Some(line) = self.items.iter_mut().find(|line| line.id == id) {
            line.quantity = quantity.clamp(0, u32::MAX as i64) as u32;
        }
    }

    /// Apply a +/- step to a line, removing it when it drops to zero or below
    ///
    /// # Returns
    /// * `Option<u32>` - The resulting quantity, or None if the line is gone
    ///   (either removed by this call or never present)
    pub fn change_quantity(&mut self, id: &str, delta: i64) -> Option<u32> {
        let current = self.get(id)?.quantity as i64;
        let next = current + delta;

        if next <= 0 {
            self.remove_item(id);
            None
        } else {
            self.update_quantity(id, next);
            self.get(id).map(|line| line.quantity)
        }
    }

    pub fn clear_cart(&mut self) {
        self.items.clear();
    }

    /// Sum of price × quantity over all lines; 0 for an empty cart
    pub fn get_total(&self) -> f64 {
        self.items.iter().map(CartLine::subtotal).sum()
    }

    pub fn items(&self) -> &[CartLine] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&CartLine> {
        self.items.iter().find(|line| line.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of units across all lines
    pub fn item_count(&self) -> u64 {
        self.items.iter().map(|line| line.quantity as u64).sum()
    }
}

/// Cart handle shared between the UI side and the detection client
///
/// The lock is only ever held for one synchronous cart operation.
#[derive(Debug, Clone, Default)]
pub struct SharedCart {
    inner: Arc<Mutex<Cart>>,
}

impl SharedCart {
    pub fn new(cart: Cart) -> Self {
        SharedCart {
            inner: Arc::new(Mutex::new(cart)),
        }
    }

    /// Lock the cart for a single operation
    ///
    /// A poisoned lock still yields the cart: every cart operation leaves it
    /// in a consistent state before it can panic.
    pub fn lock(&self) -> MutexGuard<'_, Cart> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_item(&self, product: Product) {
        self.lock().add_item(product);
    }

    pub fn remove_item(&self, id: &str) {
        self.lock().remove_item(id);
    }

    pub fn update_quantity(&self, id: &str, quantity: i64) {
        self.lock().update_quantity(id, quantity);
    }

    pub fn change_quantity(&self, id: &str, delta: i64) -> Option<u32> {
        self.lock().change_quantity(id, delta)
    }

    pub fn clear_cart(&self) {
        self.lock().clear_cart();
    }

    pub fn get_total(&self) -> f64 {
        self.lock().get_total()
    }

    /// Copy of the current cart contents
    pub fn snapshot(&self) -> Cart {
        self.lock().clone()
    }
}
