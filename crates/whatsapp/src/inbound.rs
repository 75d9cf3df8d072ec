use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InboundParseError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

/// Twilio-style inbound WhatsApp message, accepted as either form pairs
/// or a JSON object with the same field names.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "To")]
    pub to: String,
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "NumMedia", default)]
    pub num_media: String,
    #[serde(rename = "MediaUrl0", default)]
    pub media_url: Option<String>,
    #[serde(rename = "MediaContentType0", default)]
    pub media_content_type: Option<String>,
    #[serde(rename = "MessageSid", default)]
    pub message_sid: String,
}

/// Decode an `application/x-www-form-urlencoded` body into pairs.
pub fn parse_form_body(body: &str) -> Vec<(String, String)> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = percent_decode(parts.next()?)?;
            let value = percent_decode(parts.next().unwrap_or(""))?;
            Some((key, value))
        })
        .collect()
}

fn percent_decode(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        match bytes[index] {
            b'+' => {
                decoded.push(b' ');
                index += 1;
            }
            b'%' => {
                let hex = text.get(index + 1..index + 3)?;
                decoded.push(u8::from_str_radix(hex, 16).ok()?);
                index += 3;
            }
            byte => {
                decoded.push(byte);
                index += 1;
            }
        }
    }

    String::from_utf8(decoded).ok()
}

impl InboundMessage {
    pub fn from_urlencoded(body: &str) -> Result<Self, InboundParseError> {
        let pairs = parse_form_body(body);
        Self::from_form_pairs(pairs.iter().map(|(key, value)| (key.as_str(), value.as_str())))
    }

    pub fn from_form_pairs<'a, I>(pairs: I) -> Result<Self, InboundParseError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut message = InboundMessage::default();
        for (key, value) in pairs {
            match key {
                "From" => message.from = value.to_string(),
                "To" => message.to = value.to_string(),
                "Body" => message.body = value.to_string(),
                "NumMedia" => message.num_media = value.to_string(),
                "MediaUrl0" => message.media_url = Some(value.to_string()),
                "MediaContentType0" => message.media_content_type = Some(value.to_string()),
                "MessageSid" => message.message_sid = value.to_string(),
                _ => {}
            }
        }

        if message.from.is_empty() {
            return Err(InboundParseError::MissingField("From"));
        }
        if message.to.is_empty() {
            return Err(InboundParseError::MissingField("To"));
        }
        Ok(message)
    }

    pub fn from_json(value: &Value) -> Result<Self, InboundParseError> {
        let message: InboundMessage = serde_json::from_value(value.clone())
            .map_err(|_| InboundParseError::MissingField("From"))?;
        if message.from.is_empty() {
            return Err(InboundParseError::MissingField("From"));
        }
        if message.to.is_empty() {
            return Err(InboundParseError::MissingField("To"));
        }
        Ok(message)
    }

    /// Phone number without the channel prefix, e.g. `+254712345678`.
    pub fn clean_from_number(&self) -> &str {
        self.from.strip_prefix("whatsapp:").unwrap_or(&self.from)
    }

    pub fn has_image(&self) -> bool {
        let media_count = self.num_media.parse::<u32>().unwrap_or(0);
        media_count > 0
            && self
                .media_content_type
                .as_deref()
                .map(|content_type| content_type.starts_with("image"))
                .unwrap_or(false)
    }

    pub fn image_url(&self) -> Option<&str> {
        self.has_image().then(|| self.media_url.as_deref()).flatten()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{InboundMessage, InboundParseError};

    #[test]
    fn form_pairs_parse_into_a_message() {
        let message = InboundMessage::from_form_pairs([
            ("From", "whatsapp:+254712345678"),
            ("To", "whatsapp:+14155238886"),
            ("Body", "red dress for a wedding"),
            ("NumMedia", "0"),
            ("MessageSid", "SM123"),
        ])
        .expect("parse");

        assert_eq!(message.clean_from_number(), "+254712345678");
        assert_eq!(message.body, "red dress for a wedding");
        assert!(!message.has_image());
    }

    #[test]
    fn missing_sender_is_rejected() {
        let error = InboundMessage::from_form_pairs([("To", "whatsapp:+14155238886")])
            .expect_err("must fail");
        assert_eq!(error, InboundParseError::MissingField("From"));
    }

    #[test]
    fn json_payloads_parse_with_the_same_field_names() {
        let message = InboundMessage::from_json(&json!({
            "From": "whatsapp:+254712345678",
            "To": "whatsapp:+14155238886",
            "Body": "hello",
            "NumMedia": "1",
            "MediaUrl0": "https://media.example.com/photo.jpg",
            "MediaContentType0": "image/jpeg",
            "MessageSid": "SM456",
        }))
        .expect("parse");

        assert!(message.has_image());
        assert_eq!(message.image_url(), Some("https://media.example.com/photo.jpg"));
    }

    #[test]
    fn urlencoded_bodies_decode_plus_and_percent_escapes() {
        let body = "From=whatsapp%3A%2B254712345678&To=whatsapp%3A%2B14155238886\
                    &Body=red+dress+for+a+wedding&NumMedia=0&MessageSid=SM789";
        let message = InboundMessage::from_urlencoded(body).expect("parse");

        assert_eq!(message.from, "whatsapp:+254712345678");
        assert_eq!(message.body, "red dress for a wedding");
        assert_eq!(message.message_sid, "SM789");
    }

    #[test]
    fn non_image_media_is_not_an_image() {
        let message = InboundMessage::from_form_pairs([
            ("From", "whatsapp:+254712345678"),
            ("To", "whatsapp:+14155238886"),
            ("NumMedia", "1"),
            ("MediaUrl0", "https://media.example.com/voice.ogg"),
            ("MediaContentType0", "audio/ogg"),
        ])
        .expect("parse");

        assert!(!message.has_image());
        assert_eq!(message.image_url(), None);
    }
}
