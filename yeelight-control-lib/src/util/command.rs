//! The line based JSON command envelope.
//!
//! A command is one JSON object terminated by CRLF:
//!
//! ```text
//! {"id":1,"method":"set_power","params":["on","smooth",500]}\r\n
//! ```
//!
//! Parameters are rendered by the caller (strings already quoted) and are
//! joined as they are, so the encoder never re-escapes them.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProtocolError;

/// Line terminator of every command and reply.
pub const LINE_TERMINATOR: &str = "\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: u32,
    pub method: String,
    pub params: Vec<String>,
}

impl Command {
    pub fn new(id: u32, method: &str, params: Vec<String>) -> Self {
        Command {
            id,
            method: method.to_string(),
            params,
        }
    }

    /// Renders the command as it goes on the wire, CRLF included.
    pub fn encode(&self) -> String {
        format!(
            "{{\"id\":{},\"method\":\"{}\",\"params\":[{}]}}{}",
            self.id,
            self.method,
            self.params.join(","),
            LINE_TERMINATOR
        )
    }
}

/// The `error` member of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
}

/// A reply to a command. A well formed reply has exactly one of `result` and `error`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    pub id: u32,
    #[serde(default)]
    pub result: Option<Vec<Value>>,
    #[serde(default)]
    pub error: Option<ResponseError>,
}

impl Response {
    /// Decodes one reply line. Surrounding whitespace, including the terminator, is ignored.
    pub fn decode(line: &str) -> Result<Response, ProtocolError> {
        serde_json::from_str(line.trim())
            .map_err(|e| ProtocolError::Malformed(format!("{}: {:?}", e, line.trim())))
    }

    /// Checks whether a received line is the reply to command `id`.
    ///
    /// JSON lines carrying another id, or none at all (the lights push `props`
    /// notifications unasked), are not ours and yield `Ok(None)`. Anything that is
    /// not JSON, or is ours but not shaped like a reply, is malformed.
    pub fn match_line(line: &str, id: u32) -> Result<Option<Response>, ProtocolError> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| ProtocolError::Malformed(format!("{}: {:?}", e, trimmed)))?;
        if value.get("id").and_then(Value::as_u64) != Some(u64::from(id)) {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ProtocolError::Malformed(format!("{}: {:?}", e, trimmed)))
    }

    /// Turns the envelope into the `result` sequence, or the device's error.
    pub fn into_result(self) -> Result<Vec<Value>, ProtocolError> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(result),
            (None, Some(error)) => Err(ProtocolError::Device {
                code: error.code,
                message: error.message,
            }),
            (Some(_), Some(_)) => Err(ProtocolError::Malformed(format!(
                "response {} has both result and error",
                self.id
            ))),
            (None, None) => Err(ProtocolError::Malformed(format!(
                "response {} has neither result nor error",
                self.id
            ))),
        }
    }
}

/// Renders a result value the way the lights report properties: strings as they are,
/// everything else as its JSON text.
pub fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_joins_prerendered_params() {
        let command = Command::new(
            7,
            "set_music",
            vec!["1".to_string(), "\"192.168.1.5\"".to_string(), "54321".to_string()],
        );
        assert_eq!(
            command.encode(),
            "{\"id\":7,\"method\":\"set_music\",\"params\":[1,\"192.168.1.5\",54321]}\r\n"
        );
    }

    #[test]
    fn test_encode_without_params() {
        let command = Command::new(1, "toggle", Vec::new());
        assert_eq!(
            command.encode(),
            "{\"id\":1,\"method\":\"toggle\",\"params\":[]}\r\n"
        );
    }

    #[test]
    fn test_decode_result() {
        let response = Response::decode("{\"id\":3,\"result\":[\"on\",\"\",\"100\"]}\r\n").unwrap();
        assert_eq!(response.id, 3);
        assert_eq!(
            response.into_result().unwrap(),
            vec![json!("on"), json!(""), json!("100")]
        );
    }

    #[test]
    fn test_decode_error() {
        let response =
            Response::decode("{\"id\":2,\"error\":{\"code\":-1,\"message\":\"unsupported method\"}}")
                .unwrap();
        match response.into_result() {
            Err(ProtocolError::Device { code, message }) => {
                assert_eq!(code, -1);
                assert_eq!(message, "unsupported method");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_envelope_needs_exactly_one_member() {
        let both = Response::decode(
            "{\"id\":1,\"result\":[\"ok\"],\"error\":{\"code\":-1,\"message\":\"x\"}}",
        )
        .unwrap();
        assert!(matches!(both.into_result(), Err(ProtocolError::Malformed(_))));

        let neither = Response::decode("{\"id\":1}").unwrap();
        assert!(matches!(neither.into_result(), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_notification_is_not_a_response() {
        let notification = "{\"method\":\"props\",\"params\":{\"power\":\"on\"}}";
        assert!(Response::decode(notification).is_err());
    }

    #[test]
    fn test_match_line_skips_other_messages() {
        let notification = "{\"method\":\"props\",\"params\":{\"power\":\"on\"}}\r\n";
        assert_eq!(Response::match_line(notification, 4).unwrap(), None);

        let stale = "{\"id\":3,\"result\":[\"ok\"]}\r\n";
        assert_eq!(Response::match_line(stale, 4).unwrap(), None);

        assert_eq!(Response::match_line("\r\n", 4).unwrap(), None);

        let ours = "{\"id\":4,\"result\":[\"ok\"]}\r\n";
        let response = Response::match_line(ours, 4).unwrap().unwrap();
        assert_eq!(response.result, Some(vec![json!("ok")]));
    }

    #[test]
    fn test_match_line_rejects_garbage() {
        assert!(matches!(
            Response::match_line("not json\r\n", 1),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Response::match_line("{\"id\":1,\"result\":\"ok\"}", 1),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(json!("on")), "on");
        assert_eq!(value_to_string(json!(42)), "42");
    }
}
