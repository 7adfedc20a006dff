//! Recognition results and the detection-to-cart rule.

use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

use crate::cart::{Product, SharedCart};
use crate::catalog::PriceSource;
use crate::error::FeedError;

/// Product name the recognition service reports for frames it cannot match
pub const UNRECOGNIZED: &str = "Unknown or Not Recognized";

/// Minimum confidence for an auto-add (inclusive)
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.85;

/// A recognition result as it arrives over the wire
///
/// Covers both the HTTP prediction body and the socket `detection` event,
/// which names the product `product_class` and the session `cart_id`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDetection {
    #[serde(default, deserialize_with = "string_or_number")]
    pub product_id: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub product_class: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cart_id: Option<String>,
}

impl RawDetection {
    /// Session the payload is addressed to, under either field name
    pub fn session(&self) -> Option<&str> {
        self.session_id.as_deref().or(self.cart_id.as_deref())
    }
}

// The recognition service sends numeric ids for catalog-backed products.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// A well-formed recognition result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    /// Product identifier; None when the service did not name one
    pub product_id: Option<String>,
    pub product_name: String,
    pub confidence: f64,
    pub image_base64: Option<String>,
    pub session_id: Option<String>,
}

impl DetectionResult {
    pub fn new(product_id: &str, product_name: &str, confidence: f64) -> Self {
        DetectionResult {
            product_id: Some(product_id.to_string()),
            product_name: product_name.to_string(),
            confidence,
            image_base64: None,
            session_id: None,
        }
    }

    pub fn unrecognized(confidence: f64) -> Self {
        DetectionResult {
            product_id: None,
            product_name: UNRECOGNIZED.to_string(),
            confidence,
            image_base64: None,
            session_id: None,
        }
    }

    /// Parse a JSON body into a result
    pub fn from_json(body: &str) -> Result<Self, FeedError> {
        let raw: RawDetection = serde_json::from_str(body)?;
        DetectionResult::try_from(raw)
    }

    /// True when the result names a real product
    pub fn is_recognized(&self) -> bool {
        self.product_id.is_some() && self.product_name != UNRECOGNIZED
    }
}

impl TryFrom<RawDetection> for DetectionResult {
    type Error = FeedError;

    fn try_from(raw: RawDetection) -> Result<Self, Self::Error> {
        let confidence = match raw.confidence {
            Some(c) if (0.0..=1.0).contains(&c) => c,
            Some(c) => {
                return Err(FeedError::RecognitionMalformed(format!(
                    "confidence outside 0..=1: {}",
                    c
                )));
            }
            None => {
                return Err(FeedError::RecognitionMalformed(
                    "missing confidence".to_string(),
                ));
            }
        };

        let product_name = raw
            .product_name
            .clone()
            .or_else(|| raw.product_class.clone())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| FeedError::RecognitionMalformed("missing product name".to_string()))?;

        let product_id = raw.product_id.or(raw.product_class);

        Ok(DetectionResult {
            product_id,
            product_name,
            confidence,
            image_base64: raw.image_base64.or(raw.image),
            session_id: raw.session_id.or(raw.cart_id),
        })
    }
}

/// Memory of the most recent auto-add
///
/// Holds (product id, confidence) while that product keeps being recognized
/// at or above the threshold, and forgets it once the same product is seen
/// below the threshold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LastAddedGuard {
    held: Option<(String, f64)>,
}

/// What the guard decided for one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Add,
    Suppress,
    Skip,
}

impl LastAddedGuard {
    pub fn new() -> Self {
        LastAddedGuard { held: None }
    }

    pub fn held(&self) -> Option<(&str, f64)> {
        self.held.as_ref().map(|(id, c)| (id.as_str(), *c))
    }

    pub fn observe(&mut self, product_id: &str, confidence: f64, threshold: f64) -> GuardDecision {
        let holds_this = matches!(&self.held, Some((id, _)) if id == product_id);

        if confidence >= threshold {
            if holds_this {
                return GuardDecision::Suppress;
            }
            self.held = Some((product_id.to_string(), confidence));
            return GuardDecision::Add;
        }

        if holds_this {
            self.held = None;
        }
        GuardDecision::Skip
    }

    pub fn reset(&mut self) {
        self.held = None;
    }
}

/// Outcome of feeding one result through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    /// The product was added to the cart
    Added(Product),
    /// Still the product added last time
    Duplicate,
    BelowThreshold,
    Unrecognized,
    /// Recognized, but the price source has no price for it
    Unpriced(String),
}

/// The detection-to-cart rule shared by every acquisition mode
pub struct DetectionPipeline {
    cart: SharedCart,
    pricing: Arc<dyn PriceSource>,
    threshold: f64,
    guard: LastAddedGuard,
    last: Option<DetectionResult>,
}

impl DetectionPipeline {
    pub fn new(cart: SharedCart, pricing: Arc<dyn PriceSource>, threshold: f64) -> Self {
        DetectionPipeline {
            cart,
            pricing,
            threshold,
            guard: LastAddedGuard::new(),
            last: None,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn guard(&self) -> &LastAddedGuard {
        &self.guard
    }

    /// The last well-formed result, for display
    pub fn last_detection(&self) -> Option<&DetectionResult> {
        self.last.as_ref()
    }

    /// Apply one result: record it, consult the guard, maybe add to the cart
    ///
    /// # Arguments
    /// * `result` - A well-formed recognition result
    ///
    /// # Returns
    /// * `DetectionOutcome` - What happened to the cart
    pub fn process(&mut self, result: DetectionResult) -> DetectionOutcome {
        self.last = Some(result.clone());

        let Some(product_id) = result.product_id.clone() else {
            return DetectionOutcome::Unrecognized;
        };

        if result.product_name == UNRECOGNIZED {
            // Still lets a low score for the guarded product release the guard.
            self.guard.observe(&product_id, 0.0, self.threshold);
            return DetectionOutcome::Unrecognized;
        }

        let previous = self.guard.clone();
        match self.guard.observe(&product_id, result.confidence, self.threshold) {
            GuardDecision::Suppress => DetectionOutcome::Duplicate,
            GuardDecision::Skip => DetectionOutcome::BelowThreshold,
            GuardDecision::Add => {
                let Some(price) = self.pricing.price_for(&product_id) else {
                    warn!("No price for detected product {}; not added", product_id);
                    // Nothing was added, so the last real add stays guarded.
                    self.guard = previous;
                    return DetectionOutcome::Unpriced(product_id);
                };

                let product = Product::new(&product_id, &result.product_name, price)
                    .with_confidence(result.confidence);
                self.cart.add_item(product.clone());
                info!(
                    "Added to cart: {} ({:.1}%) at {:.2}",
                    product.name,
                    result.confidence * 100.0,
                    price
                );
                DetectionOutcome::Added(product)
            }
        }
    }

    /// Parse and apply a raw payload; malformed payloads change nothing
    pub fn process_raw(&mut self, raw: RawDetection) -> Option<DetectionOutcome> {
        match DetectionResult::try_from(raw) {
            Ok(result) => Some(self.process(result)),
            Err(e) => {
                debug!("Ignoring recognition payload: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPrice(f64);

    impl PriceSource for FixedPrice {
        fn price_for(&self, _product_id: &str) -> Option<f64> {
            Some(self.0)
        }
    }

    struct NoPrices;

    impl PriceSource for NoPrices {
        fn price_for(&self, _product_id: &str) -> Option<f64> {
            None
        }
    }

    fn pipeline() -> (SharedCart, DetectionPipeline) {
        let cart = SharedCart::default();
        let pipeline = DetectionPipeline::new(
            cart.clone(),
            Arc::new(FixedPrice(5.0)),
            DEFAULT_CONFIDENCE_THRESHOLD,
        );
        (cart, pipeline)
    }

    fn quantity(cart: &SharedCart, id: &str) -> u32 {
        cart.snapshot().get(id).map(|line| line.quantity).unwrap_or(0)
    }

    #[test]
    fn threshold_is_inclusive() {
        let (cart, mut p) = pipeline();
        assert!(matches!(
            p.process(DetectionResult::new("A", "Apple", 0.85)),
            DetectionOutcome::Added(_)
        ));

        let (other, mut q) = pipeline();
        assert_eq!(
            q.process(DetectionResult::new("A", "Apple", 0.8499)),
            DetectionOutcome::BelowThreshold
        );
        assert_eq!(quantity(&cart, "A"), 1);
        assert_eq!(quantity(&other, "A"), 0);
    }

    #[test]
    fn continuous_recognition_adds_once() {
        let (cart, mut p) = pipeline();
        for _ in 0..3 {
            p.process(DetectionResult::new("A", "Apple", 0.9));
        }
        assert_eq!(quantity(&cart, "A"), 1);
    }

    #[test]
    fn dropping_below_threshold_rearms_the_guard() {
        let (cart, mut p) = pipeline();
        p.process(DetectionResult::new("A", "Apple", 0.9));
        p.process(DetectionResult::new("A", "Apple", 0.5));
        assert!(p.guard().held().is_none());
        p.process(DetectionResult::new("A", "Apple", 0.9));
        assert_eq!(quantity(&cart, "A"), 2);
    }

    #[test]
    fn other_product_takes_over_the_guard() {
        let (cart, mut p) = pipeline();
        p.process(DetectionResult::new("A", "Apple", 0.9));
        p.process(DetectionResult::new("B", "Bread", 0.95));
        p.process(DetectionResult::new("A", "Apple", 0.9));

        assert_eq!(quantity(&cart, "A"), 2);
        assert_eq!(quantity(&cart, "B"), 1);
        assert_eq!(p.guard().held(), Some(("A", 0.9)));
    }

    #[test]
    fn sentinel_name_never_adds() {
        let (cart, mut p) = pipeline();
        let mut result = DetectionResult::unrecognized(0.99);
        assert_eq!(p.process(result.clone()), DetectionOutcome::Unrecognized);
        result.product_id = Some("A".to_string());
        assert_eq!(p.process(result), DetectionOutcome::Unrecognized);
        assert!(cart.snapshot().is_empty());
        assert!(p.last_detection().is_some());
    }

    #[test]
    fn unpriced_product_is_skipped() {
        let cart = SharedCart::default();
        let mut p = DetectionPipeline::new(cart.clone(), Arc::new(NoPrices), 0.85);
        assert_eq!(
            p.process(DetectionResult::new("A", "Apple", 0.9)),
            DetectionOutcome::Unpriced("A".to_string())
        );
        assert!(cart.snapshot().is_empty());
        assert!(p.guard().held().is_none());
    }

    struct OnlyApples;

    impl PriceSource for OnlyApples {
        fn price_for(&self, product_id: &str) -> Option<f64> {
            (product_id == "A").then_some(2.0)
        }
    }

    #[test]
    fn unpriced_product_keeps_previous_guard() {
        let cart = SharedCart::default();
        let mut p = DetectionPipeline::new(cart.clone(), Arc::new(OnlyApples), 0.85);

        p.process(DetectionResult::new("A", "Apple", 0.9));
        assert_eq!(
            p.process(DetectionResult::new("B", "Bread", 0.9)),
            DetectionOutcome::Unpriced("B".to_string())
        );
        assert_eq!(p.guard().held(), Some(("A", 0.9)));
        assert_eq!(p.process(DetectionResult::new("A", "Apple", 0.9)), DetectionOutcome::Duplicate);

        assert_eq!(quantity(&cart, "A"), 1);
        assert_eq!(quantity(&cart, "B"), 0);
    }

    #[test]
    fn out_of_range_confidence_is_malformed() {
        for body in [
            r#"{"product_id": "A", "product_name": "Apple", "confidence": 5.0}"#,
            r#"{"product_id": "A", "product_name": "Apple", "confidence": -0.1}"#,
        ] {
            assert!(matches!(
                DetectionResult::from_json(body),
                Err(FeedError::RecognitionMalformed(_))
            ));
        }
        assert!(DetectionResult::from_json(r#"{"product_id": "A", "product_name": "Apple", "confidence": 1.0}"#).is_ok());
    }

    #[test]
    fn accepts_both_session_and_image_spellings() {
        let raw: RawDetection = serde_json::from_str(
            r#"{"session_id": "cart_1", "cart_id": "cart_1", "image": "aGk=", "product_class": "milk", "confidence": 0.9}"#,
        )
        .unwrap();
        assert_eq!(raw.session(), Some("cart_1"));

        let result = DetectionResult::try_from(raw).unwrap();
        assert_eq!(result.session_id.as_deref(), Some("cart_1"));
        assert_eq!(result.image_base64.as_deref(), Some("aGk="));
    }

    #[test]
    fn auto_added_line_carries_confidence_and_price() {
        let (cart, mut p) = pipeline();
        p.process(DetectionResult::new("A", "Apple", 0.93));
        let line = cart.snapshot().get("A").cloned().unwrap();
        assert_eq!(line.price, 5.0);
        assert_eq!(line.confidence, Some(0.93));
    }

    #[test]
    fn parses_prediction_body() {
        let result = DetectionResult::from_json(
            r#"{"product_id": 3, "product_name": "Milk", "confidence": 0.91}"#,
        )
        .unwrap();
        assert_eq!(result.product_id.as_deref(), Some("3"));
        assert!(result.is_recognized());
    }

    #[test]
    fn parses_socket_detection_event() {
        let result = DetectionResult::from_json(
            r#"{"cart_id": "cart_1", "product_class": "milk", "confidence": 0.9}"#,
        )
        .unwrap();
        assert_eq!(result.product_id.as_deref(), Some("milk"));
        assert_eq!(result.product_name, "milk");
        assert_eq!(result.session_id.as_deref(), Some("cart_1"));
    }

    #[test]
    fn malformed_payloads_are_ignored() {
        let (cart, mut p) = pipeline();
        assert!(matches!(
            DetectionResult::from_json(r#"{"product_name": "Milk"}"#),
            Err(FeedError::RecognitionMalformed(_))
        ));
        let raw = RawDetection {
            product_id: Some("A".to_string()),
            confidence: Some(0.99),
            ..RawDetection::default()
        };
        assert!(p.process_raw(raw).is_none());
        assert!(cart.snapshot().is_empty());
        assert!(p.last_detection().is_none());
    }
}
