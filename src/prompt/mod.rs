//! Prompt assembly with cache-eligible segment marking
//!
//! Prompts are built as an ordered list of system segments followed by one
//! per-request subject message. Segment order matters for the provider's
//! prefix cache: content that is identical across calls (base instructions,
//! the output schema, and, per profile version, the personalization block)
//! comes first and is flagged cache-eligible; the subject description differs
//! on every call and is never flagged.

use crate::product::ProductDetails;
use crate::profile::StyleProfile;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Analysis mode: personalized (profile present) or generic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Full,
    Basic,
}

impl AnalysisMode {
    /// Hard mode rule: any present profile (even an empty mapping) selects
    /// full mode; only an absent profile selects basic.
    pub fn for_profile(profile: Option<&StyleProfile>) -> Self {
        match profile {
            Some(_) => Self::Full,
            None => Self::Basic,
        }
    }
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Basic => write!(f, "basic"),
        }
    }
}

impl std::str::FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "basic" => Ok(Self::Basic),
            other => Err(format!("unknown analysis mode: {other}")),
        }
    }
}

/// One system instruction segment with its prefix-cache eligibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSegment {
    pub text: String,
    pub cache_eligible: bool,
}

impl PromptSegment {
    pub fn cacheable(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache_eligible: true,
        }
    }
}

/// Builds the segment lists and subject messages for both modes.
#[derive(Debug, Clone, Default)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Ordered system segments for the given mode.
    ///
    /// Basic mode: generic instructions + output schema (both fixed across
    /// all requests). Full mode: base instructions + profile block + output
    /// schema; the profile block is stable for a fixed profile version.
    pub fn system_segments(
        &self,
        mode: AnalysisMode,
        profile: Option<&StyleProfile>,
    ) -> Vec<PromptSegment> {
        match mode {
            AnalysisMode::Basic => vec![
                PromptSegment::cacheable(BASIC_SYSTEM_PROMPT),
                PromptSegment::cacheable(ANALYSIS_SCHEMA),
            ],
            AnalysisMode::Full => {
                let profile_block = match profile {
                    Some(p) => render_profile_block(p),
                    None => render_profile_block(&StyleProfile::new()),
                };
                vec![
                    PromptSegment::cacheable(SYSTEM_PROMPT),
                    PromptSegment::cacheable(profile_block),
                    PromptSegment::cacheable(ANALYSIS_SCHEMA),
                ]
            }
        }
    }

    /// The per-request subject description. Always a separate, non-cached
    /// message since it changes on every call.
    pub fn subject_message(&self, product: &ProductDetails, mode: AnalysisMode) -> String {
        let mut lines = Vec::new();

        if !product.title.is_empty() {
            lines.push(format!("Product: {}", product.title));
        }
        lines.push(format!("Price: {} {}", product.currency, product.price));

        if let Some(category) = non_empty(&product.category) {
            lines.push(format!("Category: {category}"));
        }
        if let Some(description) = non_empty(&product.description) {
            lines.push(format!("Description: {description}"));
        }
        if let Some(materials) = non_empty(&product.materials) {
            lines.push(format!("Materials: {materials}"));
        }
        if !product.colors.is_empty() {
            lines.push(format!("Available Colors: {}", product.colors.join(", ")));
        }
        if !product.sizes.is_empty() {
            lines.push(format!("Available Sizes: {}", product.sizes.join(", ")));
        }

        let product_text = lines.join("\n");

        match mode {
            AnalysisMode::Basic => format!(
                "Analyze this product and provide a basic style assessment:\n\n\
                 {product_text}\n\n\
                 Provide a general analysis suitable for any user, focusing on:\n\
                 - Overall style and aesthetic\n\
                 - Versatility and styling potential\n\
                 - Quality and value considerations\n\
                 - General fit characteristics\n\n\
                 Return your analysis in the specified JSON format."
            ),
            AnalysisMode::Full => format!(
                "Analyze this product based on the user's style profile:\n\n\
                 {product_text}\n\n\
                 Provide a detailed, personalized analysis addressing:\n\
                 - How well this matches the user's preferences\n\
                 - Specific styling suggestions aligned with their goals\n\
                 - Fit considerations for their body type\n\
                 - How this integrates into their existing wardrobe\n\n\
                 Return your analysis in the specified JSON format."
            ),
        }
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

/// Recognized preference fields, rendered first in this priority order.
const RECOGNIZED_FIELDS: &[(&str, &str)] = &[
    ("fit_preferences", "Preferred Fits"),
    ("color_palette", "Color Preferences"),
    ("style_goals", "Style Goals"),
    ("body_type", "Body Type"),
    ("priorities", "Priorities"),
    ("avoidances", "Avoid"),
];

/// Render the personalization block deterministically: recognized fields in
/// priority order, then any remaining fields generically in sorted-key order
/// (label = humanized key, lists comma-joined). Stable text for a fixed
/// profile is what makes this segment cache-eligible per profile version.
pub fn render_profile_block(profile: &StyleProfile) -> String {
    let mut sections = Vec::new();

    for (key, label) in RECOGNIZED_FIELDS {
        if let Some(value) = profile.get(key) {
            sections.push(format!("{label}: {}", render_value(value)));
        }
    }

    let mut remaining: Vec<(&String, &Value)> = profile
        .iter()
        .filter(|(key, _)| !RECOGNIZED_FIELDS.iter().any(|(k, _)| k == key))
        .collect();
    remaining.sort_by_key(|(key, _)| key.as_str());

    for (key, value) in remaining {
        sections.push(format!("{}: {}", humanize_key(key), render_value(value)));
    }

    let profile_text = sections.join("\n");

    format!(
        "USER STYLE PROFILE:\n\n\
         {profile_text}\n\n\
         Use this profile to personalize your analysis and recommendations. \
         Focus on how well the product aligns with these preferences."
    )
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(", "),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// "body_type" -> "Body Type"
fn humanize_key(key: &str) -> String {
    key.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Base instructions for full, personalized analysis. Identical across all
/// users and requests.
pub const SYSTEM_PROMPT: &str = "\
You are a professional style analyst specializing in personalized clothing recommendations.

Your role is to analyze clothing products and provide detailed, personalized style guidance based on user preferences and product characteristics.

Key Responsibilities:
1. Evaluate how well a product matches the user's style preferences
2. Provide detailed analysis of fit, versatility, and styling potential
3. Suggest specific outfit combinations and styling tips
4. Identify any potential concerns or limitations
5. Give honest, actionable recommendations

Analysis Approach:
- Be specific and practical in your recommendations
- Consider the user's body type, style goals, and lifestyle
- Focus on versatility and how the item integrates into their wardrobe
- Highlight both strengths and potential limitations
- Provide concrete styling suggestions with specific garment pairings

Tone:
- Professional but friendly
- Honest and direct
- Helpful and encouraging
- Avoid generic fashion clich\u{e9}s
- Use clear, accessible language";

/// Simplified instructions for basic, non-personalized analysis.
pub const BASIC_SYSTEM_PROMPT: &str = "\
You are a professional style analyst providing general clothing recommendations.

Your role is to analyze clothing products and provide objective style guidance.

Key Responsibilities:
1. Evaluate the product's overall style and quality
2. Assess versatility and styling potential
3. Suggest general outfit combinations
4. Identify strengths and limitations
5. Give honest, actionable recommendations

Analysis Approach:
- Be specific and practical
- Focus on versatility and value
- Provide concrete styling suggestions
- Highlight both strengths and limitations
- Consider general body type compatibility

Tone:
- Professional but friendly
- Honest and direct
- Helpful and encouraging
- Use clear, accessible language";

/// Output-schema description. Fixed across all requests in both modes.
pub const ANALYSIS_SCHEMA: &str = r#"EXPECTED RESPONSE FORMAT:

Provide your analysis as a valid JSON object with the following structure:

{
  "style_match_score": <number 0-100>,
  "match_reasoning": "<brief explanation of the score>",

  "fit_analysis": {
    "expected_fit": "<description of how it will fit>",
    "body_type_suitability": "<how it works with user's body type>",
    "sizing_notes": "<any sizing considerations>"
  },

  "versatility_score": <number 0-100>,
  "versatility_notes": "<explanation of versatility>",

  "outfit_suggestions": [
    {
      "occasion": "<e.g., casual, work, going out>",
      "pairing": "<specific items to pair with>",
      "styling_tips": "<how to style this combination>"
    }
  ],

  "pros": [
    "<positive aspect 1>",
    "<positive aspect 2>"
  ],

  "cons": [
    "<concern or limitation 1>",
    "<concern or limitation 2>"
  ],

  "overall_recommendation": "<buy/consider/pass>",
  "final_thoughts": "<concise summary and recommendation>"
}

Requirements:
- All scores must be integers between 0-100
- Provide at least 2-3 outfit suggestions
- List at least 2 pros and 2 cons (or 1 if minimal)
- Be specific in your recommendations
- Ensure valid JSON format (no trailing commas, proper escaping)
- Keep outfit suggestions practical and specific"#;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_product() -> ProductDetails {
        ProductDetails {
            id: 1,
            title: "Merino Crewneck".to_string(),
            price: 79.9,
            currency: "USD".to_string(),
            description: Some("Midweight merino sweater".to_string()),
            materials: Some("100% merino wool".to_string()),
            category: Some("Knitwear".to_string()),
            colors: vec!["navy".to_string(), "charcoal".to_string()],
            sizes: vec!["S".to_string(), "M".to_string(), "L".to_string()],
        }
    }

    fn sample_profile() -> StyleProfile {
        StyleProfile::from_value(json!({
            "fit_preferences": ["slim", "regular"],
            "color_palette": ["navy", "grey"],
            "body_type": "athletic",
            "occasion_focus": ["office", "weekend"],
        }))
        .unwrap()
    }

    #[test]
    fn test_mode_for_profile() {
        assert_eq!(AnalysisMode::for_profile(None), AnalysisMode::Basic);

        let empty = StyleProfile::new();
        assert_eq!(AnalysisMode::for_profile(Some(&empty)), AnalysisMode::Full);
    }

    #[test]
    fn test_basic_mode_has_two_cacheable_segments() {
        let segments = PromptAssembler::new().system_segments(AnalysisMode::Basic, None);

        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.cache_eligible));
        assert_eq!(segments[0].text, BASIC_SYSTEM_PROMPT);
        assert_eq!(segments[1].text, ANALYSIS_SCHEMA);
    }

    #[test]
    fn test_full_mode_has_three_cacheable_segments() {
        let profile = sample_profile();
        let segments =
            PromptAssembler::new().system_segments(AnalysisMode::Full, Some(&profile));

        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| s.cache_eligible));
        assert_eq!(segments[0].text, SYSTEM_PROMPT);
        assert!(segments[1].text.contains("USER STYLE PROFILE"));
        assert_eq!(segments[2].text, ANALYSIS_SCHEMA);
    }

    #[test]
    fn test_profile_block_is_deterministic() {
        let profile = sample_profile();
        assert_eq!(render_profile_block(&profile), render_profile_block(&profile));
    }

    #[test]
    fn test_profile_block_renders_recognized_fields_in_priority_order() {
        let block = render_profile_block(&sample_profile());

        let fits = block.find("Preferred Fits: slim, regular").unwrap();
        let colors = block.find("Color Preferences: navy, grey").unwrap();
        let body = block.find("Body Type: athletic").unwrap();

        assert!(fits < colors);
        assert!(colors < body);
    }

    #[test]
    fn test_profile_block_humanizes_unrecognized_fields() {
        let block = render_profile_block(&sample_profile());
        assert!(block.contains("Occasion Focus: office, weekend"));
    }

    #[test]
    fn test_subject_message_includes_product_fields() {
        let message =
            PromptAssembler::new().subject_message(&sample_product(), AnalysisMode::Full);

        assert!(message.contains("Product: Merino Crewneck"));
        assert!(message.contains("Price: USD 79.9"));
        assert!(message.contains("Available Colors: navy, charcoal"));
        assert!(message.contains("style profile"));
    }

    #[test]
    fn test_subject_message_skips_absent_fields() {
        let mut product = sample_product();
        product.description = None;
        product.colors.clear();

        let message = PromptAssembler::new().subject_message(&product, AnalysisMode::Basic);

        assert!(!message.contains("Description:"));
        assert!(!message.contains("Available Colors:"));
        assert!(message.contains("basic style assessment"));
    }
}
