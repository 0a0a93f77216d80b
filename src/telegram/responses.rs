use serde::Deserialize;

/// Envelope shared by every Bot API method.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub error_code: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    pub result: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct SentMessage {
    #[serde(default)]
    pub message_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RawUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub from: Option<RawUser>,
    pub chat: RawChat,
    #[serde(default)]
    pub text: Option<String>,
    pub date: i64,
}

#[derive(Debug, Deserialize)]
pub struct RawUser {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct RawChat {
    pub id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_message_ok() {
        let json = r#"{"ok": true, "result": {"message_id": 812, "chat": {"id": -100}}}"#;
        let resp: ApiResponse<SentMessage> = serde_json::from_str(json).unwrap();
        assert!(resp.ok);
        assert_eq!(resp.result.unwrap().message_id, Some(812));
    }

    #[test]
    fn test_error_envelope() {
        let json = r#"{"ok": false, "error_code": 400, "description": "Bad Request: chat not found"}"#;
        let resp: ApiResponse<SentMessage> = serde_json::from_str(json).unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.error_code, Some(400));
        assert!(resp.result.is_none());
    }

    #[test]
    fn test_updates_with_and_without_message() {
        let json = r#"{"ok": true, "result": [
            {"update_id": 10, "message": {"from": {"id": 7, "username": "op"}, "chat": {"id": 7}, "text": "sync", "date": 1700000000}},
            {"update_id": 11, "edited_message": {}}
        ]}"#;
        let resp: ApiResponse<Vec<RawUpdate>> = serde_json::from_str(json).unwrap();
        let updates = resp.result.unwrap();
        assert_eq!(updates.len(), 2);
        let msg = updates[0].message.as_ref().unwrap();
        assert_eq!(msg.from.as_ref().unwrap().id, 7);
        assert_eq!(msg.text.as_deref(), Some("sync"));
        assert!(updates[1].message.is_none());
    }
}
