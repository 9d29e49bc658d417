//! services/api/src/adapters/analysis_llm.rs
//!
//! This module contains the adapter for the product-analysis LLM.
//! It implements the `ProductAnalysisService` port from the `core` crate, for
//! both product data (text) and packaging photos (vision).

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrlArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use nutriscan_core::{
    domain::{AiAnalysisResult, ImagePayload, RawProductData},
    ports::{PortError, PortResult, ProductAnalysisService},
};
use tracing::debug;

use super::verdict::parse_verdict;

/// Low temperature keeps scores repeatable for the same product.
const TEMPERATURE: f32 = 0.1;

const SYSTEM_PROMPT: &str = "You are a nutritionist and environmental analyst. \
You assess packaged food products and always reply with a single JSON object and nothing else.";

const RESPONSE_SHAPE: &str = r#"{
  "healthScore": <integer 1-100>,
  "sustainabilityScore": <integer 1-100>,
  "healthAnalysis": "<short health assessment>",
  "healthPros": [{"title": "<headline>", "detail": "<explanation>"}],
  "healthCons": [{"title": "<headline>", "detail": "<explanation>"}],
  "healthRecommendations": ["<recommendation>"],
  "sustainabilityAnalysis": "<short sustainability assessment>",
  "sustainabilityPros": [{"title": "<headline>", "detail": "<explanation>"}],
  "sustainabilityCons": [{"title": "<headline>", "detail": "<explanation>"}],
  "sustainabilityRecommendations": ["<recommendation>"]
}"#;

const SCORING_RULES: &str = "\
SCORING RULES (scores must be deterministic: the same product always gets the same scores):
Health score, anchored to the Nutri-Score when available:
- A: 80-100, B: 60-79, C: 40-59, D: 20-39, E: 1-19.
- Adjust within the band for additives, sugars, salt, saturated fat, fiber and protein.
Sustainability score, anchored to the Eco-Score when available:
- A: 80-100, B: 60-79, C: 40-59, D: 20-39, E: 1-19.
- Without an Eco-Score weigh packaging, ingredient origin, certifications and product type equally (25% each).
If data is missing make reasonable assumptions but stay consistent.";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ProductAnalysisService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiAnalysisAdapter {
    client: Client<OpenAIConfig>,
    analysis_model: String,
    vision_model: String,
}

impl OpenAiAnalysisAdapter {
    pub fn new(client: Client<OpenAIConfig>, analysis_model: String, vision_model: String) -> Self {
        Self {
            client,
            analysis_model,
            vision_model,
        }
    }

    /// Sends one chat completion and returns the first choice's text.
    async fn complete(
        &self,
        model: &str,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> PortResult<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(TEMPERATURE)
            .response_format(ResponseFormat::JsonObject)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        if let Some(choice) = response.choices.into_iter().next() {
            if let Some(content) = choice.message.content {
                Ok(content)
            } else {
                Err(PortError::Unexpected(
                    "Analysis LLM response contained no text content.".to_string(),
                ))
            }
        } else {
            Err(PortError::Unexpected(
                "Analysis LLM returned no choices in its response.".to_string(),
            ))
        }
    }

    fn system_message() -> PortResult<ChatCompletionRequestMessage> {
        Ok(ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_PROMPT)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .into())
    }
}

//=========================================================================================
// `ProductAnalysisService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ProductAnalysisService for OpenAiAnalysisAdapter {
    async fn analyze_product(&self, product: &RawProductData) -> PortResult<AiAnalysisResult> {
        let messages = vec![
            Self::system_message()?,
            ChatCompletionRequestUserMessageArgs::default()
                .content(analysis_prompt(product))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let reply = self.complete(&self.analysis_model, messages).await?;
        debug!(barcode = %product.code, reply_len = reply.len(), "received product analysis");
        Ok(parse_verdict(&reply))
    }

    async fn analyze_image(
        &self,
        image: &ImagePayload,
        name_hint: Option<&str>,
    ) -> PortResult<AiAnalysisResult> {
        if image.bytes.is_empty() {
            return Err(PortError::Unexpected("Cannot analyze an empty image.".to_string()));
        }
        let data_url = format!("data:{};base64,{}", image.mime_type, STANDARD.encode(&image.bytes));

        let text_part = ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(vision_prompt(name_hint))
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let image_part = ChatCompletionRequestMessageContentPartImageArgs::default()
            .image_url(
                ImageUrlArgs::default()
                    .url(data_url)
                    .detail(ImageDetail::High)
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?,
            )
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let parts: Vec<ChatCompletionRequestUserMessageContentPart> =
            vec![text_part.into(), image_part.into()];

        let messages = vec![
            Self::system_message()?,
            ChatCompletionRequestUserMessageArgs::default()
                .content(parts)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let reply = self.complete(&self.vision_model, messages).await?;
        debug!(reply_len = reply.len(), "received vision analysis");
        Ok(parse_verdict(&reply))
    }
}

//=========================================================================================
// Prompts
//=========================================================================================

fn or_unknown(value: Option<&str>) -> &str {
    value.map(str::trim).filter(|v| !v.is_empty()).unwrap_or("not available")
}

fn nutrient(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{} {}", v, unit),
        None => "n/a".to_string(),
    }
}

/// Builds the text-analysis prompt from normalized product data.
pub fn analysis_prompt(product: &RawProductData) -> String {
    let n = &product.nutriments;
    format!(
        "Analyze the following food product and provide TWO separate scores:\n\
         1. A health score from 1 (least healthy) to 100 (most healthy).\n\
         2. An environmental sustainability score from 1 (least sustainable) to 100 (most sustainable).\n\n\
         PRODUCT DATA:\n\
         Name: {name}\n\
         Brand: {brand}\n\
         Nutri-Score: {nutri}\n\
         Eco-Score: {eco}\n\
         Ingredients: {ingredients}\n\
         Origins: {origins}\n\
         Packaging: {packaging}\n\
         Categories: {categories}\n\
         Labels/Certifications: {labels}\n\n\
         NUTRITION FACTS (per 100g):\n\
         Energy: {energy}\n\
         Fat: {fat}\n\
         Saturated fat: {saturated}\n\
         Carbohydrates: {carbs}\n\
         Sugars: {sugars}\n\
         Fiber: {fiber}\n\
         Proteins: {proteins}\n\
         Salt: {salt}\n\n\
         {rules}\n\n\
         Reply with a JSON object of exactly this shape:\n{shape}",
        name = or_unknown(product.product_name.as_deref()),
        brand = or_unknown(product.brand.as_deref()),
        nutri = or_unknown(product.nutrition_grade.as_deref()),
        eco = or_unknown(product.ecoscore_grade.as_deref()),
        ingredients = or_unknown(product.ingredients.as_deref()),
        origins = or_unknown(product.origins.as_deref()),
        packaging = or_unknown(product.packaging.as_deref()),
        categories = or_unknown(product.categories.as_deref()),
        labels = or_unknown(product.labels.as_deref()),
        energy = nutrient(n.energy_kcal_100g, "kcal"),
        fat = nutrient(n.fat_100g, "g"),
        saturated = nutrient(n.saturated_fat_100g, "g"),
        carbs = nutrient(n.carbohydrates_100g, "g"),
        sugars = nutrient(n.sugars_100g, "g"),
        fiber = nutrient(n.fiber_100g, "g"),
        proteins = nutrient(n.proteins_100g, "g"),
        salt = nutrient(n.salt_100g, "g"),
        rules = SCORING_RULES,
        shape = RESPONSE_SHAPE,
    )
}

/// Builds the vision prompt. The reply shape extends the text one with the
/// identified product name and brand.
pub fn vision_prompt(name_hint: Option<&str>) -> String {
    let hint = match name_hint.map(str::trim).filter(|h| !h.is_empty()) {
        Some(hint) => format!("The user says this product is: \"{}\".\n", hint),
        None => String::new(),
    };
    format!(
        "The attached photo shows a packaged food product.\n\
         {hint}\
         Identify the product and its brand from the packaging, read any visible \
         nutrition table, ingredient list, Nutri-Score or Eco-Score, then score it.\n\n\
         {rules}\n\n\
         Reply with a JSON object of exactly this shape, adding \"productName\" and \"brand\" \
         (use null when they cannot be read):\n{shape}",
        hint = hint,
        rules = SCORING_RULES,
        shape = RESPONSE_SHAPE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nutriscan_core::domain::Nutriments;

    #[test]
    fn analysis_prompt_lists_product_facts() {
        let product = RawProductData {
            code: "8001505005707".into(),
            product_name: Some("Pasta X".into()),
            brand: Some("Barilla".into()),
            nutrition_grade: Some("a".into()),
            nutriments: Nutriments {
                fat_100g: Some(1.5),
                ..Default::default()
            },
            ..Default::default()
        };

        let prompt = analysis_prompt(&product);
        assert!(prompt.contains("Name: Pasta X"));
        assert!(prompt.contains("Brand: Barilla"));
        assert!(prompt.contains("Nutri-Score: a"));
        assert!(prompt.contains("Eco-Score: not available"));
        assert!(prompt.contains("Fat: 1.5 g"));
        assert!(prompt.contains("Salt: n/a"));
        assert!(prompt.contains("A: 80-100"));
        assert!(prompt.contains("\"healthScore\""));
    }

    #[test]
    fn vision_prompt_mentions_hint_only_when_given() {
        assert!(vision_prompt(Some("Grissini")).contains("\"Grissini\""));
        assert!(!vision_prompt(Some("  ")).contains("The user says"));
        assert!(vision_prompt(None).contains("\"productName\""));
    }
}
