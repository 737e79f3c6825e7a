//! Decrypted-payload field extraction (§4.3 step 1-7). The wire schema is
//! permissive about casing and nesting so field lookup tolerates both
//! `from.userid` and a flat `fromuserid`, and both `encrypt`/`Encrypt` on the
//! outer envelope.

use serde_json::Value;

pub struct ParsedInbound {
    pub msgid: Option<String>,
    pub chattype: Option<String>,
    pub sender_id: Option<String>,
    pub group_chat_id: Option<String>,
    pub response_url: Option<String>,
    pub msgtype: Option<String>,
    pub body: Value,
}

pub fn outer_ciphertext(envelope: &Value) -> Option<&str> {
    envelope
        .get("encrypt")
        .or_else(|| envelope.get("Encrypt"))
        .and_then(Value::as_str)
}

pub fn parse_inbound(body: &Value) -> ParsedInbound {
    let sender_id = body
        .get("from")
        .and_then(|f| f.get("userid"))
        .and_then(Value::as_str)
        .or_else(|| body.get("fromuserid").and_then(Value::as_str))
        .map(str::to_string);

    ParsedInbound {
        msgid: str_field(body, "msgid"),
        chattype: str_field(body, "chattype"),
        sender_id,
        group_chat_id: str_field(body, "chatid"),
        response_url: str_field(body, "response_url"),
        msgtype: str_field(body, "msgtype"),
        body: body.clone(),
    }
}

fn str_field(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

impl ParsedInbound {
    /// `chattype == "group"` with a non-empty `chatid` uses that id; else the
    /// sender's own id is the chat id (§4.3 step 5).
    pub fn resolve_chat_id(&self) -> Option<&str> {
        if self.chattype.as_deref() == Some("group") {
            if let Some(id) = self.group_chat_id.as_deref() {
                if !id.is_empty() {
                    return Some(id);
                }
            }
        }
        self.sender_id.as_deref()
    }

    pub fn text_content(&self) -> Option<&str> {
        self.body.get("text").and_then(|t| t.get("content")).and_then(Value::as_str)
    }

    pub fn voice_content(&self) -> Option<&str> {
        self.body.get("voice").and_then(|v| v.get("content")).and_then(Value::as_str)
    }

    pub fn image_url(&self) -> Option<&str> {
        self.body.get("image").and_then(|i| i.get("url")).and_then(Value::as_str)
    }

    pub fn image_media_id(&self) -> Option<&str> {
        self.body.get("image").and_then(|i| i.get("media_id")).and_then(Value::as_str)
    }

    /// Concatenates the `content` of every `mixed` sub-item whose `msgtype`
    /// is `text` (§4.3 step 7).
    pub fn mixed_text(&self) -> String {
        let Some(items) = self.body.get("msg_item").and_then(Value::as_array) else {
            return String::new();
        };
        items
            .iter()
            .filter(|item| item.get("msgtype").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(|t| t.get("content")).and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outer_ciphertext_accepts_either_casing() {
        let lower = serde_json::json!({"encrypt": "abc"});
        let upper = serde_json::json!({"Encrypt": "abc"});
        assert_eq!(outer_ciphertext(&lower), Some("abc"));
        assert_eq!(outer_ciphertext(&upper), Some("abc"));
    }

    #[test]
    fn sender_id_falls_back_to_flat_field() {
        let body = serde_json::json!({"fromuserid": "zhangsan"});
        let parsed = parse_inbound(&body);
        assert_eq!(parsed.sender_id.as_deref(), Some("zhangsan"));
    }

    #[test]
    fn sender_id_prefers_nested_from_object() {
        let body = serde_json::json!({"from": {"userid": "zhangsan"}, "fromuserid": "other"});
        let parsed = parse_inbound(&body);
        assert_eq!(parsed.sender_id.as_deref(), Some("zhangsan"));
    }

    #[test]
    fn group_chat_uses_chatid_when_present() {
        let body = serde_json::json!({"chattype": "group", "chatid": "group-1", "from": {"userid": "zhangsan"}});
        let parsed = parse_inbound(&body);
        assert_eq!(parsed.resolve_chat_id(), Some("group-1"));
    }

    #[test]
    fn single_chat_uses_sender_id() {
        let body = serde_json::json!({"chattype": "single", "from": {"userid": "zhangsan"}});
        let parsed = parse_inbound(&body);
        assert_eq!(parsed.resolve_chat_id(), Some("zhangsan"));
    }

    #[test]
    fn mixed_text_concatenates_text_items_only() {
        let body = serde_json::json!({
            "msg_item": [
                {"msgtype": "text", "text": {"content": "hello "}},
                {"msgtype": "image", "image": {"url": "http://x"}},
                {"msgtype": "text", "text": {"content": "world"}},
            ]
        });
        let parsed = parse_inbound(&body);
        assert_eq!(parsed.mixed_text(), "hello world");
    }
}
