use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub Uuid);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub tenant_id: super::tenant::TenantId,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Decimal,
    pub sizes: Vec<String>,
    pub colors: Vec<String>,
    pub stock_quantity: u32,
    pub tags: Vec<String>,
    pub image_urls: Vec<String>,
    pub active: bool,
}

impl Product {
    /// Case-insensitive name match used when a customer refers to a
    /// previously shown product in free text.
    pub fn mentioned_in(&self, text: &str) -> bool {
        let normalized = text.to_ascii_lowercase();
        normalized.contains(&self.name.to_ascii_lowercase())
    }

    pub fn size_mentioned_in(&self, text: &str) -> Option<String> {
        let tokens: Vec<String> =
            text.split_whitespace().map(|token| token.trim_matches(|ch: char| !ch.is_ascii_alphanumeric()).to_ascii_uppercase()).collect();
        self.sizes.iter().find(|size| tokens.iter().any(|token| token == &size.to_ascii_uppercase())).cloned()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::{Product, ProductId};
    use crate::domain::tenant::TenantId;

    fn product_fixture(name: &str, sizes: &[&str]) -> Product {
        Product {
            id: ProductId(Uuid::new_v4()),
            tenant_id: TenantId(Uuid::new_v4()),
            name: name.to_string(),
            description: None,
            category: Some("dresses".to_string()),
            price: Decimal::new(350_000, 2),
            sizes: sizes.iter().map(|size| size.to_string()).collect(),
            colors: vec!["red".to_string()],
            stock_quantity: 4,
            tags: Vec::new(),
            image_urls: Vec::new(),
            active: true,
        }
    }

    #[test]
    fn mention_matching_is_case_insensitive() {
        let product = product_fixture("Maxi Wrap Dress", &["S", "M", "L"]);
        assert!(product.mentioned_in("I'll take the maxi wrap dress please"));
        assert!(!product.mentioned_in("the blue blazer"));
    }

    #[test]
    fn size_mention_requires_a_whole_token() {
        let product = product_fixture("Maxi Wrap Dress", &["S", "M", "L"]);
        assert_eq!(product.size_mentioned_in("medium? no, give me M"), Some("M".to_string()));
        // "small" contains 's' but is not the token "S"
        assert_eq!(product.size_mentioned_in("something small-ish"), None);
    }

    #[test]
    fn size_mention_strips_punctuation() {
        let product = product_fixture("Maxi Wrap Dress", &["S", "M", "L"]);
        assert_eq!(product.size_mentioned_in("size L, thanks!"), Some("L".to_string()));
    }
}
