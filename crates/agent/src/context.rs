use serde_json::Value;

use sokoni_core::domain::conversation::GatheredContext;

/// Pure merge extractor: slots explicitly present in the utterance (or
/// supplied as model entities) overwrite, everything else passes through
/// from the previous context unchanged. Extraction never regresses the
/// context and never errors.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContextExtractor;

impl ContextExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(
        &self,
        user_text: &str,
        model_entities: Option<&Value>,
        previous: &GatheredContext,
    ) -> GatheredContext {
        let detected = detect_slots(user_text);
        let merged = previous.merged_with(&detected);

        match model_entities.and_then(parse_entities) {
            Some(entities) => merged.merged_with(&entities),
            None => merged,
        }
    }
}

/// Entities from the reasoning model are untrusted; anything that is not
/// a string-valued object field is ignored wholesale.
fn parse_entities(value: &Value) -> Option<GatheredContext> {
    let object = value.as_object()?;
    let field = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(|text| text.to_ascii_lowercase())
    };

    Some(GatheredContext {
        product_type: field("product_type"),
        color: field("color"),
        occasion: field("occasion"),
        style: field("style"),
        size: field("size").map(|size| size.to_ascii_uppercase()),
        price_range: field("price_range"),
    })
}

fn normalize_text(text: &str) -> String {
    text.to_ascii_lowercase()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn detect_slots(text: &str) -> GatheredContext {
    let normalized = normalize_text(text);
    let tokens = tokenize(&normalized);

    GatheredContext {
        product_type: detect_product_type(&tokens),
        color: detect_color(&tokens),
        occasion: detect_occasion(&tokens),
        style: detect_style(&tokens),
        size: detect_size(&tokens),
        price_range: detect_price_range(&normalized),
    }
}

const PRODUCT_TYPES: &[(&str, &str)] = &[
    ("dress", "dress"),
    ("dresses", "dress"),
    ("gown", "dress"),
    ("top", "top"),
    ("tops", "top"),
    ("blouse", "top"),
    ("shirt", "shirt"),
    ("shirts", "shirt"),
    ("pants", "pants"),
    ("trousers", "pants"),
    ("jeans", "jeans"),
    ("skirt", "skirt"),
    ("skirts", "skirt"),
    ("jacket", "jacket"),
    ("jackets", "jacket"),
    ("coat", "jacket"),
    ("shoes", "shoes"),
    ("heels", "shoes"),
    ("sneakers", "shoes"),
    ("bag", "bag"),
    ("bags", "bag"),
    ("clutch", "bag"),
];

const COLORS: &[&str] = &[
    "red", "blue", "black", "white", "green", "yellow", "pink", "purple", "orange", "brown",
    "navy", "gold", "silver", "beige",
];

const OCCASIONS: &[&str] = &[
    "wedding", "party", "work", "office", "formal", "gym", "date", "church", "graduation",
    "beach", "travel",
];

const STYLES: &[&str] =
    &["elegant", "casual", "trendy", "classic", "professional", "sporty", "chic", "vintage"];

fn detect_product_type(tokens: &[String]) -> Option<String> {
    for token in tokens {
        if let Some((_, canonical)) =
            PRODUCT_TYPES.iter().find(|(keyword, _)| keyword == &token.as_str())
        {
            return Some((*canonical).to_string());
        }
    }
    None
}

fn detect_color(tokens: &[String]) -> Option<String> {
    tokens.iter().find(|token| COLORS.contains(&token.as_str())).cloned()
}

fn detect_occasion(tokens: &[String]) -> Option<String> {
    tokens
        .iter()
        .find(|token| OCCASIONS.contains(&token.as_str()))
        .map(|token| if token == "office" { "work".to_string() } else { token.clone() })
}

fn detect_style(tokens: &[String]) -> Option<String> {
    tokens.iter().find(|token| STYLES.contains(&token.as_str())).cloned()
}

/// `xs`, `xl` and `xxl` are unambiguous tokens; the single letters `s`,
/// `m` and `l` are only read as sizes when the word "size" appears in
/// the message ("size M", "M size"), to keep "I'm" and similar noise
/// from setting the slot.
fn detect_size(tokens: &[String]) -> Option<String> {
    let explicit =
        tokens.iter().find(|token| matches!(token.as_str(), "xs" | "xl" | "xxl")).cloned();
    if let Some(size) = explicit {
        return Some(size.to_ascii_uppercase());
    }

    if tokens.iter().any(|token| token == "size" || token == "sized") {
        return tokens
            .iter()
            .find(|token| matches!(token.as_str(), "s" | "m" | "l"))
            .map(|token| token.to_ascii_uppercase());
    }
    None
}

fn detect_price_range(normalized: &str) -> Option<String> {
    let tiers: &[(&[&str], &str)] = &[
        (&["budget", "cheap", "affordable"], "budget"),
        (&["mid-range", "mid range", "moderate"], "mid-range"),
        (&["premium", "luxury", "designer", "high end", "high-end"], "premium"),
    ];

    tiers
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| normalized.contains(keyword)))
        .map(|(_, tier)| (*tier).to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use sokoni_core::domain::conversation::GatheredContext;

    use super::{detect_slots, ContextExtractor};

    #[test]
    fn specific_request_fills_three_slots() {
        let extractor = ContextExtractor::new();
        let context =
            extractor.extract("red dress for a wedding", None, &GatheredContext::default());

        assert_eq!(context.product_type.as_deref(), Some("dress"));
        assert_eq!(context.color.as_deref(), Some("red"));
        assert_eq!(context.occasion.as_deref(), Some("wedding"));
        assert!(context.is_actionable());
    }

    #[test]
    fn vague_request_extracts_nothing() {
        let context = detect_slots("I need something");
        assert!(context.is_empty());
    }

    #[test]
    fn previously_set_slots_survive_unrelated_messages() {
        let extractor = ContextExtractor::new();
        let first =
            extractor.extract("looking for a red dress", None, &GatheredContext::default());
        let second = extractor.extract("hmm let me think", None, &first);

        assert_eq!(second, first);
        assert_eq!(second.color.as_deref(), Some("red"));
    }

    #[test]
    fn a_new_explicit_value_replaces_the_old_one() {
        let extractor = ContextExtractor::new();
        let first = extractor.extract("a red dress", None, &GatheredContext::default());
        let second = extractor.extract("actually make it blue", None, &first);

        assert_eq!(second.color.as_deref(), Some("blue"));
        assert_eq!(second.product_type.as_deref(), Some("dress"));
    }

    #[test]
    fn plural_and_alias_product_mentions_canonicalize() {
        assert_eq!(detect_slots("show me dresses").product_type.as_deref(), Some("dress"));
        assert_eq!(detect_slots("nice heels").product_type.as_deref(), Some("shoes"));
        assert_eq!(detect_slots("an evening gown").product_type.as_deref(), Some("dress"));
    }

    #[test]
    fn bare_letter_is_only_a_size_next_to_the_word_size() {
        assert_eq!(detect_slots("i'm not sure yet").size, None);
        assert_eq!(detect_slots("size m please").size.as_deref(), Some("M"));
        assert_eq!(detect_slots("xl works").size.as_deref(), Some("XL"));
    }

    #[test]
    fn price_tier_phrases_map_to_canonical_tiers() {
        assert_eq!(detect_slots("something cheap").price_range.as_deref(), Some("budget"));
        assert_eq!(detect_slots("a luxury piece").price_range.as_deref(), Some("premium"));
    }

    #[test]
    fn model_entities_merge_but_null_and_junk_do_not_clear() {
        let extractor = ContextExtractor::new();
        let previous = GatheredContext {
            product_type: Some("dress".to_string()),
            color: Some("red".to_string()),
            ..GatheredContext::default()
        };

        let entities = json!({ "occasion": "party", "color": null, "style": 42 });
        let context = extractor.extract("ok", Some(&entities), &previous);

        assert_eq!(context.occasion.as_deref(), Some("party"));
        assert_eq!(context.color.as_deref(), Some("red"));
        assert_eq!(context.style, None);
    }

    #[test]
    fn non_object_entities_are_ignored_entirely() {
        let extractor = ContextExtractor::new();
        let previous =
            GatheredContext { color: Some("red".to_string()), ..GatheredContext::default() };

        let context = extractor.extract("ok", Some(&json!("not an object")), &previous);
        assert_eq!(context, previous);
    }
}
