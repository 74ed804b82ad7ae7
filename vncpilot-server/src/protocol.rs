//! Wire types of the line-delimited JSON tool protocol.
//!
//! ```text
//! → {"id": 1, "tool": "connect", "arguments": {"host": "lab", "port": 5900}}
//! ← {"id": 1, "content": [{"type": "text", "text": "connected to lab:5900 (1024x768)"}]}
//! ← {"id": 2, "error": "unknown tool: teleport"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One tool call.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Echoed back verbatim; any JSON value.
    #[serde(default)]
    pub id: Value,
    pub tool: String,
    /// Named arguments. `null` or absent means none.
    #[serde(default)]
    pub arguments: Value,
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn args(&self) -> Map<String, Value> {
        match &self.arguments {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        }
    }
}

/// One result item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "mimeType")]
        mime_type: String,
        /// Base64 of the encoded image.
        data: String,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn png(data: String) -> Self {
        Content::Image {
            mime_type: "image/png".into(),
            data,
        }
    }
}

/// The answer to one [`Request`]: either content or a protocol error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<Content>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn content(id: Value, content: Vec<Content>) -> Self {
        Self {
            id,
            content: Some(content),
            error: None,
        }
    }

    pub fn error(id: Value, error: impl Into<String>) -> Self {
        Self {
            id,
            content: None,
            error: Some(error.into()),
        }
    }

    /// Serialize as one protocol line, without the newline.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"id":null,"error":"response not serializable: {e}"}}"#)
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_arguments_default_to_empty() {
        let req = Request::parse(r#"{"id":"a","tool":"status"}"#).unwrap();
        assert_eq!(req.id, json!("a"));
        assert!(req.args().is_empty());

        let req = Request::parse(r#"{"id":1,"tool":"status","arguments":null}"#).unwrap();
        assert!(req.args().is_empty());

        assert!(Request::parse(r#"{"id":1}"#).is_err());
    }

    #[test]
    fn content_shapes() {
        let resp = Response::content(
            json!(7),
            vec![Content::text("true"), Content::png("AAAA".into())],
        );
        let value: Value = serde_json::from_str(&resp.to_line()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": 7,
                "content": [
                    {"type": "text", "text": "true"},
                    {"type": "image", "mimeType": "image/png", "data": "AAAA"}
                ]
            })
        );
    }

    #[test]
    fn error_shape() {
        let line = Response::error(json!(null), "unknown tool: x").to_line();
        assert_eq!(line, r#"{"id":null,"error":"unknown tool: x"}"#);
    }
}
