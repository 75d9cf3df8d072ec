use rust_decimal::Decimal;

use sokoni_core::domain::cart::{cart_total, CartLine};
use sokoni_core::domain::conversation::Slot;
use sokoni_core::domain::product::Product;

use crate::router::ChatPrompt;

/// Deterministic reply templates. Model-phrased copy is an enhancement
/// applied by individual handlers; every turn can fall back to these.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseComposer;

impl ResponseComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn welcome(&self, customer_name: Option<&str>) -> String {
        let name_part = customer_name.map(|name| format!(" {name}")).unwrap_or_default();
        format!(
            "Hello{name_part}! 👋 Welcome to our boutique! I can help you find the perfect \
             outfit. Send me a photo of what you're looking for, or just describe it!"
        )
    }

    pub fn chat_reply(&self, prompt: &ChatPrompt, customer_name: Option<&str>) -> String {
        match prompt {
            ChatPrompt::Welcome => self.welcome(customer_name),
            ChatPrompt::AskSlot(slot) => slot_question(*slot).to_string(),
            ChatPrompt::DirectOffer => {
                "Let me pull some options for you! Tell me one thing — a color, an occasion, \
                 or a style — and I'll show you pieces you'll love."
                    .to_string()
            }
            ChatPrompt::Generic => {
                "Could you tell me more about what you're looking for?".to_string()
            }
            ChatPrompt::Custom(question) => question.clone(),
        }
    }

    /// The only copy the outermost boundary is allowed to produce.
    pub fn fallback_reply(&self) -> String {
        "I'm having a little trouble right now 🙈 — could you please say that again?".to_string()
    }

    pub fn no_results(&self) -> String {
        "I couldn't find anything matching that. Could you describe what you're looking for \
         in a different way?"
            .to_string()
    }

    pub fn recommendation_fallback(&self, products: &[Product]) -> String {
        let names: Vec<&str> =
            products.iter().take(3).map(|product| product.name.as_str()).collect();
        format!(
            "I found these for you: {}. Which one would you like to know more about?",
            names.join(", ")
        )
    }

    pub fn ask_size(&self, product: &Product) -> String {
        format!(
            "Great choice! What size would you like for the {}?\n\nAvailable sizes: {}",
            product.name,
            product.sizes.join(", ")
        )
    }

    pub fn cart_added(&self, line: &CartLine, lines: &[CartLine], currency: &str) -> String {
        format!(
            "✅ Added to cart!\n\n{name} ({size})\nPrice: {currency} {price}\n\n📦 Cart: \
             {count} item(s), total {currency} {total}\n\nReady to checkout? Just say \
             'checkout' or 'pay now'!",
            name = line.product_name,
            size = line.size,
            price = line.unit_price,
            count = lines.len(),
            total = cart_total(lines),
        )
    }

    pub fn cart_summary(&self, lines: &[CartLine], currency: &str) -> String {
        if lines.is_empty() {
            return "Your cart is empty! 🛒 Browse our collection and add the pieces you love."
                .to_string();
        }

        let mut summary = String::from("🛒 Your cart:\n\n");
        for (index, line) in lines.iter().enumerate() {
            summary.push_str(&format!(
                "{no}. {name} ({size}) — {currency} {price} x {qty} = {currency} {line_total}\n",
                no = index + 1,
                name = line.product_name,
                size = line.size,
                price = line.unit_price,
                qty = line.quantity,
                line_total = line.line_total(),
            ));
        }
        summary.push_str(&format!(
            "\nTotal: {currency} {total}\n\nReady to checkout? Say 'checkout' or 'pay now'!",
            total = cart_total(lines),
        ));
        summary
    }

    pub fn empty_cart_checkout(&self) -> String {
        "Your cart is empty! Browse our products and add items before checking out.".to_string()
    }

    pub fn payment_requested(
        &self,
        order_number: &str,
        total: Decimal,
        currency: &str,
        mock: bool,
    ) -> String {
        if mock {
            format!(
                "🧪 Payment simulated for order {order_number}.\nTotal: {currency} {total}\n\n\
                 In production you would receive an M-Pesa prompt on your phone."
            )
        } else {
            format!(
                "💳 Payment request sent!\n\nOrder {order_number}\nTotal: {currency} {total}\n\n\
                 📱 Check your phone for the M-Pesa prompt and enter your PIN to complete \
                 payment. We'll confirm as soon as it lands!"
            )
        }
    }

    pub fn payment_failed(&self) -> String {
        "❌ I couldn't start the payment. Please try again in a moment or contact support."
            .to_string()
    }

    pub fn image_trouble(&self) -> String {
        "I had trouble analyzing that image. Could you try sending it again?".to_string()
    }

    pub fn inquiry_fallback(&self, boutique_name: &str) -> String {
        format!(
            "Happy to help! {boutique_name} delivers countrywide within 2-3 days and accepts \
             M-Pesa. Anything else you'd like to know?"
        )
    }
}

fn slot_question(slot: Slot) -> &'static str {
    match slot {
        Slot::ProductType => {
            "I'd love to help! What kind of piece are you looking for — a dress, a top, shoes?"
        }
        Slot::Color => "Lovely! What color are you thinking?",
        Slot::Occasion => "Nice! What's the occasion — work, a wedding, a night out?",
        Slot::Style => "Got it. Any style you lean towards — elegant, casual, classic?",
        Slot::Size => "What size should I look for?",
        Slot::PriceRange => "Any budget in mind — budget-friendly, mid-range, or premium?",
    }
}
