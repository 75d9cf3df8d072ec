use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Webhook signature scheme: HMAC-SHA256 over the callback URL followed
/// by the form parameters sorted by name and concatenated as
/// `name=value`, hex-encoded.
pub fn compute_signature(secret: &str, url: &str, params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|left, right| left.0.cmp(&right.0));

    let mut payload = String::from(url);
    for (name, value) in sorted {
        payload.push_str(name);
        payload.push('=');
        payload.push_str(value);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    hex_encode(&mac.finalize().into_bytes())
}

pub fn verify_signature(
    secret: &str,
    url: &str,
    params: &[(String, String)],
    provided: &str,
) -> bool {
    let Some(provided_bytes) = hex_decode(provided) else {
        return false;
    };

    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|left, right| left.0.cmp(&right.0));

    let mut payload = String::from(url);
    for (name, value) in sorted {
        payload.push_str(name);
        payload.push('=');
        payload.push_str(value);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    mac.verify_slice(&provided_bytes).is_ok()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn hex_decode(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&text[index..index + 2], 16).ok())
        .collect()
}
