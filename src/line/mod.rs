//! LINE Messaging API adapter.
//!
//! - `signature`: `x-line-signature` verification
//! - `client`: reply and content download API calls
//! - `webhook`: axum routes for the callback and health check

pub mod client;
pub mod signature;
pub mod webhook;

use serde::Deserialize;
use tracing::debug;

use crate::platform::{InboundEvent, MessageContent};

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(default)]
    events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    reply_token: Option<String>,
    source: Option<EventSource>,
    message: Option<EventMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventSource {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    id: String,
    #[serde(rename = "type")]
    message_type: String,
    text: Option<String>,
}

/// Parse a webhook body into replyable message events.
///
/// Non-message events (follow, unfollow, postback, ...) and events without
/// a reply token or sender are dropped.
pub fn parse_events(body: &[u8]) -> Result<Vec<InboundEvent>, serde_json::Error> {
    let body: WebhookBody = serde_json::from_slice(body)?;

    let events = body
        .events
        .into_iter()
        .filter_map(|event| {
            if event.event_type != "message" {
                debug!("Ignoring {} event", event.event_type);
                return None;
            }
            let reply_token = event.reply_token?;
            let user_id = event.source.and_then(|s| s.user_id)?;
            let message = event.message?;

            let content = match message.message_type.as_str() {
                "text" => MessageContent::Text(message.text.unwrap_or_default()),
                "audio" => MessageContent::Audio {
                    message_id: message.id,
                },
                other => MessageContent::Unsupported(other.to_string()),
            };
            Some(InboundEvent {
                reply_token,
                user_id,
                content,
            })
        })
        .collect();

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_audio_and_unsupported_messages() {
        let body = br#"{
            "destination": "Ubot",
            "events": [
                {"type": "message", "replyToken": "r1", "source": {"type": "user", "userId": "U1"},
                 "message": {"id": "m1", "type": "text", "text": "How are you today?"}},
                {"type": "message", "replyToken": "r2", "source": {"type": "user", "userId": "U2"},
                 "message": {"id": "m2", "type": "audio", "duration": 2300}},
                {"type": "message", "replyToken": "r3", "source": {"type": "user", "userId": "U3"},
                 "message": {"id": "m3", "type": "sticker", "packageId": "1", "stickerId": "2"}}
            ]
        }"#;

        let events = parse_events(body).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].content, MessageContent::Text("How are you today?".into()));
        assert_eq!(events[0].reply_token, "r1");
        assert_eq!(
            events[1].content,
            MessageContent::Audio {
                message_id: "m2".into()
            }
        );
        assert_eq!(events[2].content, MessageContent::Unsupported("sticker".into()));
    }

    #[test]
    fn drops_non_message_and_unaddressable_events() {
        let body = br#"{"events": [
            {"type": "follow", "replyToken": "r1", "source": {"type": "user", "userId": "U1"}},
            {"type": "message", "source": {"type": "user", "userId": "U1"},
             "message": {"id": "m1", "type": "text", "text": "no token"}},
            {"type": "message", "replyToken": "r3", "source": {"type": "group", "groupId": "G1"},
             "message": {"id": "m3", "type": "text", "text": "no user"}}
        ]}"#;
        assert!(parse_events(body).unwrap().is_empty());
    }

    #[test]
    fn verification_ping_has_no_events() {
        assert!(parse_events(br#"{"destination": "Ubot", "events": []}"#).unwrap().is_empty());
        assert!(parse_events(b"not json").is_err());
    }
}
