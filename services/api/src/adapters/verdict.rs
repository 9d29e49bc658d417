//! services/api/src/adapters/verdict.rs
//!
//! Turns the AI service's free-form reply into an `AiAnalysisResult`.
//!
//! The reply is expected to be a JSON object, but models wrap it in prose or
//! code fences, rename keys and flatten pros/cons into strings. Parsing never
//! fails: whatever cannot be read is replaced by a neutral placeholder and
//! scores fall back to 50, always clamped to 1..=100.

use std::sync::OnceLock;

use nutriscan_core::domain::{AiAnalysisResult, AnalysisPoint};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

pub const DEFAULT_SCORE: u8 = 50;
pub const NOT_AVAILABLE: &str = "Not available";
const HEALTH_PLACEHOLDER: &str = "A detailed health analysis could not be generated.";
const SUSTAINABILITY_PLACEHOLDER: &str =
    "A detailed sustainability analysis could not be generated.";

fn score_patterns() -> Option<&'static (Regex, Regex)> {
    static PATTERNS: OnceLock<Option<(Regex, Regex)>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            let health = Regex::new(r#"(?i)health_?score["'\s:=]+(\d{1,3})"#).ok()?;
            let sustainability = Regex::new(r#"(?i)sustainability_?score["'\s:=]+(\d{1,3})"#).ok()?;
            Some((health, sustainability))
        })
        .as_ref()
}

/// Parses a model reply. Always yields a complete verdict.
pub fn parse_verdict(reply: &str) -> AiAnalysisResult {
    match extract_object(reply) {
        Some(object) => from_object(&object, reply),
        None => {
            warn!(reply_len = reply.len(), "AI reply contained no JSON object, using fallback verdict");
            fallback(reply)
        }
    }
}

/// The first balanced-looking `{...}` span that parses as a JSON object.
fn extract_object(reply: &str) -> Option<Map<String, Value>> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&reply[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn from_object(object: &Map<String, Value>, reply: &str) -> AiAnalysisResult {
    let get = |keys: &[&str]| keys.iter().find_map(|&key| object.get(key));
    let (health_fallback, sustainability_fallback) = scraped_scores(reply);

    AiAnalysisResult {
        health_score: get(&["healthScore", "health_score"])
            .and_then(score_value)
            .unwrap_or(health_fallback),
        health_analysis: get(&["healthAnalysis", "health_analysis", "analysis"])
            .and_then(text_value)
            .unwrap_or_else(|| HEALTH_PLACEHOLDER.to_string()),
        health_pros: points_or_placeholder(get(&["healthPros", "health_pros", "pros"])),
        health_cons: points_or_placeholder(get(&["healthCons", "health_cons", "cons"])),
        health_recommendations: strings_or_placeholder(get(&[
            "healthRecommendations",
            "health_recommendations",
            "recommendations",
        ])),
        sustainability_score: get(&["sustainabilityScore", "sustainability_score"])
            .and_then(score_value)
            .unwrap_or(sustainability_fallback),
        sustainability_analysis: get(&["sustainabilityAnalysis", "sustainability_analysis"])
            .and_then(text_value)
            .unwrap_or_else(|| SUSTAINABILITY_PLACEHOLDER.to_string()),
        sustainability_pros: points_or_placeholder(get(&[
            "sustainabilityPros",
            "sustainability_pros",
        ])),
        sustainability_cons: points_or_placeholder(get(&[
            "sustainabilityCons",
            "sustainability_cons",
        ])),
        sustainability_recommendations: strings_or_placeholder(get(&[
            "sustainabilityRecommendations",
            "sustainability_recommendations",
        ])),
        product_name_from_vision: get(&["productName", "product_name", "name"]).and_then(text_value),
        brand_from_vision: get(&["brand", "brands"]).and_then(text_value),
    }
}

fn fallback(reply: &str) -> AiAnalysisResult {
    let (health_score, sustainability_score) = scraped_scores(reply);
    AiAnalysisResult {
        health_score,
        health_analysis: HEALTH_PLACEHOLDER.to_string(),
        health_pros: vec![placeholder_point()],
        health_cons: vec![placeholder_point()],
        health_recommendations: vec![NOT_AVAILABLE.to_string()],
        sustainability_score,
        sustainability_analysis: SUSTAINABILITY_PLACEHOLDER.to_string(),
        sustainability_pros: vec![placeholder_point()],
        sustainability_cons: vec![placeholder_point()],
        sustainability_recommendations: vec![NOT_AVAILABLE.to_string()],
        product_name_from_vision: None,
        brand_from_vision: None,
    }
}

/// Scores found anywhere in the raw text, defaulting to 50.
fn scraped_scores(reply: &str) -> (u8, u8) {
    let Some((health, sustainability)) = score_patterns() else {
        return (DEFAULT_SCORE, DEFAULT_SCORE);
    };
    let scrape = |pattern: &Regex| {
        pattern
            .captures(reply)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<i64>().ok())
            .map(clamp_score)
            .unwrap_or(DEFAULT_SCORE)
    };
    (scrape(health), scrape(sustainability))
}

fn clamp_score(value: i64) -> u8 {
    value.clamp(1, 100) as u8
}

fn score_value(value: &Value) -> Option<u8> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then(|| clamp_score(number.round() as i64))
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn placeholder_point() -> AnalysisPoint {
    AnalysisPoint::new(NOT_AVAILABLE, "")
}

fn points_or_placeholder(value: Option<&Value>) -> Vec<AnalysisPoint> {
    let points: Vec<AnalysisPoint> = match value {
        Some(Value::Array(items)) => items.iter().filter_map(point_value).collect(),
        Some(other) => point_value(other).into_iter().collect(),
        None => Vec::new(),
    };
    if points.is_empty() {
        vec![placeholder_point()]
    } else {
        points
    }
}

/// Accepts `{title, detail}` objects, plain strings and JSON-encoded objects.
fn point_value(value: &Value) -> Option<AnalysisPoint> {
    match value {
        Value::Object(map) => {
            let field = |keys: &[&str]| keys.iter().find_map(|&key| map.get(key).and_then(text_value));
            let title = field(&["title", "name", "point", "aspect"]);
            let detail = field(&["detail", "details", "description", "explanation", "text"]);
            match (title, detail) {
                (Some(title), detail) => Some(AnalysisPoint::new(title, detail.unwrap_or_default())),
                (None, Some(detail)) => Some(AnalysisPoint::new(detail, "")),
                (None, None) => None,
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if s.starts_with('{') {
                if let Ok(inner @ Value::Object(_)) = serde_json::from_str::<Value>(s) {
                    return point_value(&inner);
                }
            }
            Some(match s.split_once(": ") {
                Some((title, detail)) if !title.is_empty() && !detail.trim().is_empty() => {
                    AnalysisPoint::new(title.trim(), detail.trim())
                }
                _ => AnalysisPoint::new(s, ""),
            })
        }
        _ => None,
    }
}

fn strings_or_placeholder(value: Option<&Value>) -> Vec<String> {
    let items: Vec<String> = match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(_) => text_value(item),
                Value::Object(_) => point_value(item).map(|p| {
                    if p.detail.is_empty() {
                        p.title
                    } else {
                        format!("{}: {}", p.title, p.detail)
                    }
                }),
                _ => None,
            })
            .collect(),
        Some(other) => text_value(other).into_iter().collect(),
        None => Vec::new(),
    };
    if items.is_empty() {
        vec![NOT_AVAILABLE.to_string()]
    } else {
        items
    }
}
