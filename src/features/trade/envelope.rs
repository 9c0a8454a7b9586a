use serde::{Deserialize, Serialize};

use crate::features::trade::message::{ChatMessage, NotificationKind};

pub const TAG_TRADE_REQUEST: &str = "trade_request";
pub const TAG_SELLER_ACCEPTED: &str = "seller_accepted";
pub const TAG_BUYER_PAID: &str = "buyer_paid";
pub const TAG_SELLER_VERIFIED: &str = "seller_verified";
pub const TAG_SELLER_TRANSFERRED: &str = "seller_transferred";
pub const TAG_BUYER_CONFIRMED_RECEIPT: &str = "buyer_confirmed_receipt";
pub const TAG_ORDER_FAILED: &str = "order_failed";

/// Shared field set of a protocol envelope. Unknown fields are preserved in
/// `extra` and re-emitted on serialization, never stripped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeFields {
    #[serde(rename = "orderId", default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(rename = "amountPKR", default, skip_serializing_if = "Option::is_none")]
    pub amount_pkr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(
        rename = "paymentMethod",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_wallet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_wallet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The closed set of protocol transitions this client acts on. Anything else
/// arriving on the channel is handled as opaque chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TradeEnvelope {
    #[serde(rename = "trade_request")]
    TradeRequest(EnvelopeFields),
    #[serde(rename = "seller_accepted")]
    SellerAccepted(EnvelopeFields),
    #[serde(rename = "buyer_paid")]
    BuyerPaid(EnvelopeFields),
    #[serde(rename = "seller_verified")]
    SellerVerified(EnvelopeFields),
    #[serde(
        rename = "seller_transferred",
        alias = "seller_completed",
        alias = "seller_sent"
    )]
    SellerTransferred(EnvelopeFields),
    #[serde(rename = "buyer_confirmed_receipt")]
    BuyerConfirmedReceipt(EnvelopeFields),
    #[serde(rename = "order_failed")]
    OrderFailed(EnvelopeFields),
}

impl TradeEnvelope {
    pub fn tag(&self) -> &'static str {
        match self {
            TradeEnvelope::TradeRequest(_) => TAG_TRADE_REQUEST,
            TradeEnvelope::SellerAccepted(_) => TAG_SELLER_ACCEPTED,
            TradeEnvelope::BuyerPaid(_) => TAG_BUYER_PAID,
            TradeEnvelope::SellerVerified(_) => TAG_SELLER_VERIFIED,
            TradeEnvelope::SellerTransferred(_) => TAG_SELLER_TRANSFERRED,
            TradeEnvelope::BuyerConfirmedReceipt(_) => TAG_BUYER_CONFIRMED_RECEIPT,
            TradeEnvelope::OrderFailed(_) => TAG_ORDER_FAILED,
        }
    }

    pub fn fields(&self) -> &EnvelopeFields {
        match self {
            TradeEnvelope::TradeRequest(f)
            | TradeEnvelope::SellerAccepted(f)
            | TradeEnvelope::BuyerPaid(f)
            | TradeEnvelope::SellerVerified(f)
            | TradeEnvelope::SellerTransferred(f)
            | TradeEnvelope::BuyerConfirmedReceipt(f)
            | TradeEnvelope::OrderFailed(f) => f,
        }
    }

    pub fn notification_kind(&self) -> NotificationKind {
        match self {
            TradeEnvelope::TradeRequest(_) => NotificationKind::TradeInitiated,
            TradeEnvelope::BuyerPaid(_) => NotificationKind::PaymentReceived,
            _ => NotificationKind::StatusChange,
        }
    }

    /// Serialized object form, `type` discriminator included.
    pub fn to_metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// Normalizes a raw wire tag (alias forms included) to the canonical tag, or
/// `None` for tags outside the closed set.
pub fn canonical_tag(raw: &str) -> Option<&'static str> {
    match raw {
        TAG_TRADE_REQUEST => Some(TAG_TRADE_REQUEST),
        TAG_SELLER_ACCEPTED => Some(TAG_SELLER_ACCEPTED),
        TAG_BUYER_PAID => Some(TAG_BUYER_PAID),
        TAG_SELLER_VERIFIED => Some(TAG_SELLER_VERIFIED),
        TAG_SELLER_TRANSFERRED | "seller_completed" | "seller_sent" => {
            Some(TAG_SELLER_TRANSFERRED)
        }
        TAG_BUYER_CONFIRMED_RECEIPT => Some(TAG_BUYER_CONFIRMED_RECEIPT),
        TAG_ORDER_FAILED => Some(TAG_ORDER_FAILED),
        _ => None,
    }
}

/// Result of interpreting one inbound chat payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPayload {
    /// A transition in the closed protocol set.
    Protocol(TradeEnvelope),
    /// Self-describing payload with a `type` this client does not know.
    /// Stored and re-broadcast, never actioned.
    Opaque(serde_json::Value),
    /// Plain chat text or attachment.
    Text,
}

/// Interprets a chat message as a protocol envelope where possible.
///
/// The envelope may ride in the message's own `type`+`metadata`, or embedded
/// as a JSON object in `text`. Malformed payloads fall back to plain text.
pub fn parse_payload(msg: &ChatMessage) -> ParsedPayload {
    if let Some(parsed) = parse_tagged(&msg.kind, &msg.metadata) {
        return parsed;
    }

    let trimmed = msg.text.trim();
    if trimmed.starts_with('{') {
        if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str(trimmed) {
            if let Some(serde_json::Value::String(tag)) = obj.get("type") {
                let tag = tag.clone();
                if let Some(parsed) = parse_tagged(&tag, &obj) {
                    return parsed;
                }
            }
        }
    }

    ParsedPayload::Text
}

fn parse_tagged(
    raw_tag: &str,
    body: &serde_json::Map<String, serde_json::Value>,
) -> Option<ParsedPayload> {
    match canonical_tag(raw_tag) {
        Some(tag) => {
            let mut obj = body.clone();
            obj.insert("type".into(), serde_json::Value::String(tag.into()));
            match serde_json::from_value::<TradeEnvelope>(serde_json::Value::Object(obj.clone())) {
                Ok(envelope) => Some(ParsedPayload::Protocol(envelope)),
                Err(err) => {
                    tracing::warn!("malformed {tag} payload treated as chat: {err}");
                    None
                }
            }
        }
        None if raw_tag != "message" && raw_tag != "attachment" && body.contains_key("type") => {
            Some(ParsedPayload::Opaque(serde_json::Value::Object(
                body.clone(),
            )))
        }
        None if raw_tag != "message" && raw_tag != "attachment" && !raw_tag.is_empty() => {
            let mut obj = body.clone();
            obj.insert("type".into(), serde_json::Value::String(raw_tag.into()));
            Some(ParsedPayload::Opaque(serde_json::Value::Object(obj)))
        }
        None => None,
    }
}

/// The normalized protocol tag of a message, if it carries one.
pub fn protocol_tag(msg: &ChatMessage) -> Option<&'static str> {
    match parse_payload(msg) {
        ParsedPayload::Protocol(envelope) => Some(envelope.tag()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::trade::message::Role;

    fn protocol_msg(tag: &str, metadata: serde_json::Value) -> ChatMessage {
        let map = match metadata {
            serde_json::Value::Object(m) => m,
            _ => serde_json::Map::new(),
        };
        ChatMessage::new("room-1", "0xbuyer", Role::Buyer, tag, "line", map)
    }

    #[test]
    fn recognizes_envelope_from_message_type_and_metadata() {
        let msg = protocol_msg(
            TAG_TRADE_REQUEST,
            serde_json::json!({"orderId": "o-1", "amountPKR": 5000.0, "token": "USDC"}),
        );
        match parse_payload(&msg) {
            ParsedPayload::Protocol(TradeEnvelope::TradeRequest(f)) => {
                assert_eq!(f.order_id.as_deref(), Some("o-1"));
                assert_eq!(f.amount_pkr, Some(5000.0));
                assert_eq!(f.token.as_deref(), Some("USDC"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn recognizes_envelope_embedded_in_text() {
        let mut msg = ChatMessage::plain("room-1", "0xseller", Role::Seller, "");
        msg.text = r#"{"type":"seller_accepted","paymentMethod":"bank transfer 1234"}"#.into();
        match parse_payload(&msg) {
            ParsedPayload::Protocol(TradeEnvelope::SellerAccepted(f)) => {
                assert_eq!(f.payment_method.as_deref(), Some("bank transfer 1234"));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn transfer_alias_tags_normalize() {
        for raw in ["seller_transferred", "seller_completed", "seller_sent"] {
            let msg = protocol_msg(raw, serde_json::json!({}));
            assert_eq!(protocol_tag(&msg), Some(TAG_SELLER_TRANSFERRED));
        }
    }

    #[test]
    fn unknown_type_is_opaque_not_dropped() {
        let msg = protocol_msg("dispute_opened", serde_json::json!({"case": 7}));
        match parse_payload(&msg) {
            ParsedPayload::Opaque(value) => {
                assert_eq!(value["type"], "dispute_opened");
                assert_eq!(value["case"], 7);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn malformed_payload_degrades_to_text() {
        // amountPKR carrying a string cannot decode into the closed union
        let msg = protocol_msg(
            TAG_TRADE_REQUEST,
            serde_json::json!({"amountPKR": "five thousand"}),
        );
        assert_eq!(parse_payload(&msg), ParsedPayload::Text);

        let mut chat = ChatMessage::plain("room-1", "0xb", Role::Buyer, "{not json");
        chat.text = "{not json".into();
        assert_eq!(parse_payload(&chat), ParsedPayload::Text);
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let wire = serde_json::json!({
            "type": "buyer_paid",
            "orderId": "o-9",
            "proofUrl": "https://receipts.example/9"
        });
        let envelope: TradeEnvelope = serde_json::from_value(wire).unwrap();
        let out = serde_json::to_value(&envelope).unwrap();
        assert_eq!(out["proofUrl"], "https://receipts.example/9");
        assert_eq!(out["type"], "buyer_paid");
    }
}
