//! services/api/src/adapters/nutrition.rs
//!
//! Open Food Facts client implementing the `NutritionLookupService` port.
//! The product endpoint's loosely typed JSON is normalized into `RawProductData`
//! here so the core never sees empty strings or numbers encoded as text.

use std::time::Duration;

use async_trait::async_trait;
use nutriscan_core::domain::{Nutriments, RawProductData};
use nutriscan_core::ports::{NutritionLookupService, PortError, PortResult};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Clone)]
pub struct OpenFoodFactsAdapter {
    client: Client,
    base_url: String,
}

impl OpenFoodFactsAdapter {
    pub fn new(base_url: &str, user_agent: &str) -> PortResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PortError::Unexpected(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn product_url(&self, barcode: &str) -> String {
        format!("{}/api/v0/product/{}.json", self.base_url, barcode)
    }
}

//=========================================================================================
// `NutritionLookupService` Trait Implementation
//=========================================================================================

#[async_trait]
impl NutritionLookupService for OpenFoodFactsAdapter {
    async fn lookup(&self, barcode: &str) -> PortResult<Option<RawProductData>> {
        // Anything else cannot be a product code and must not reach the URL path.
        if barcode.is_empty() || !barcode.chars().all(|c| c.is_ascii_alphanumeric()) {
            debug!(barcode, "rejecting malformed barcode");
            return Ok(None);
        }

        let response = self
            .client
            .get(self.product_url(barcode))
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("Nutrition database request failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(PortError::Unexpected(format!(
                "Nutrition database answered with status {}",
                response.status()
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            PortError::Unexpected(format!("Failed to parse nutrition database response: {}", e))
        })?;
        Ok(normalize_product(barcode, &body))
    }
}

//=========================================================================================
// Normalization
//=========================================================================================

/// Converts a v0 product response into `RawProductData`. `None` when the
/// database reports the product as unknown.
pub fn normalize_product(barcode: &str, body: &Value) -> Option<RawProductData> {
    if body.get("status").and_then(as_number) == Some(0.0) {
        return None;
    }
    let product = body.get("product")?.as_object()?;
    let field = |key: &str| product.get(key).and_then(as_text);
    let first_field = |keys: &[&str]| keys.iter().find_map(|&key| field(key));

    let nutriments = product
        .get("nutriments")
        .map(normalize_nutriments)
        .unwrap_or_default();

    // Records stay keyed by the scanned code; the database may answer with
    // a normalized form (UPC-A as EAN-13).
    if let Some(reported) = body.get("code").and_then(as_text) {
        if reported != barcode {
            debug!(barcode, %reported, "nutrition database normalized the barcode");
        }
    }

    Some(RawProductData {
        code: barcode.to_string(),
        product_name: first_field(&["product_name", "generic_name"]),
        brand: field("brands"),
        image_url: first_field(&["image_url", "image_front_url"]),
        ingredients: field("ingredients_text"),
        nutrition_grade: first_field(&["nutrition_grades", "nutriscore_grade"]),
        ecoscore_grade: field("ecoscore_grade"),
        origins: field("origins"),
        packaging: field("packaging"),
        categories: field("categories"),
        labels: field("labels"),
        nutriments,
    })
}

fn kj_to_kcal(kj: f64) -> f64 {
    (kj / 4.184 * 10.0).round() / 10.0
}

fn normalize_nutriments(value: &Value) -> Nutriments {
    let number = |key: &str| value.get(key).and_then(as_number);
    Nutriments {
        // The generic energy key is in kJ.
        energy_kcal_100g: number("energy-kcal_100g").or_else(|| {
            number("energy-kj_100g")
                .or_else(|| number("energy_100g"))
                .map(kj_to_kcal)
        }),
        fat_100g: number("fat_100g"),
        saturated_fat_100g: number("saturated-fat_100g").or_else(|| number("saturated_fat_100g")),
        carbohydrates_100g: number("carbohydrates_100g"),
        sugars_100g: number("sugars_100g"),
        fiber_100g: number("fiber_100g"),
        proteins_100g: number("proteins_100g"),
        salt_100g: number("salt_100g"),
    }
}

/// Non-empty trimmed text, accepting numbers rendered as text too.
fn as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// A finite number, given either as a JSON number or a numeric string.
fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}
