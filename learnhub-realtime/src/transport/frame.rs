//! STOMP 1.2 frame codec, limited to the commands a subscribing client uses.

use std::{fmt, str::FromStr};

use thiserror::Error;

const NUL: char = '\0';

/// Why a frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The command line is not a STOMP command.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// A header line has no `:`.
    #[error("malformed header line '{0}'")]
    MalformedHeader(String),

    /// A header uses an escape STOMP does not define.
    #[error("invalid escape sequence in '{0}'")]
    InvalidEscape(String),

    /// `content-length` is not a number or exceeds the body.
    #[error("invalid content-length '{0}'")]
    InvalidContentLength(String),

    /// No blank line after the headers, or no NUL after the body.
    #[error("frame is not NUL terminated")]
    MissingTerminator,
}

/// STOMP command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// `CONNECT`
    Connect,
    /// `STOMP`, the 1.2 alias of `CONNECT`.
    Stomp,
    /// `CONNECTED`
    Connected,
    /// `SEND`
    Send,
    /// `SUBSCRIBE`
    Subscribe,
    /// `UNSUBSCRIBE`
    Unsubscribe,
    /// `DISCONNECT`
    Disconnect,
    /// `MESSAGE`
    Message,
    /// `RECEIPT`
    Receipt,
    /// `ERROR`
    Error,
}

impl Command {
    /// Command line text.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are sent without escaping.
    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command line.
    pub command: Command,
    /// Headers in wire order, unescaped.
    pub headers: Vec<(String, String)>,
    /// Body without the NUL terminator.
    pub body: String,
}

impl Frame {
    /// Frame with no headers and an empty body.
    #[must_use]
    pub const fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header. Repeated headers keep the first occurrence.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// `CONNECT` for STOMP 1.2 carrying a bearer token.
    pub fn connect(host: &str, token: &str) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("Authorization", format!("Bearer {token}"))
            .header("heart-beat", "0,0")
    }

    /// `CONNECTED` as a server answers a handshake.
    pub fn connected() -> Self {
        Self::new(Command::Connected)
            .header("version", "1.2")
            .header("heart-beat", "0,0")
    }

    /// `SUBSCRIBE` to `destination` under subscription `id`.
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    /// `UNSUBSCRIBE` of subscription `id`.
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    /// `DISCONNECT` asking for a receipt.
    pub fn disconnect(receipt: &str) -> Self {
        Self::new(Command::Disconnect).header("receipt", receipt)
    }

    /// `RECEIPT` answering `receipt_id`.
    pub fn receipt(receipt_id: &str) -> Self {
        Self::new(Command::Receipt).header("receipt-id", receipt_id)
    }

    /// `ERROR` with a `message` header.
    pub fn error(message: &str) -> Self {
        Self::new(Command::Error).header("message", message)
    }

    /// `MESSAGE` delivered on `subscription`, with a `content-length`.
    pub fn message(destination: &str, subscription: &str, message_id: &str, body: String) -> Self {
        Self::new(Command::Message)
            .header("destination", destination)
            .header("subscription", subscription)
            .header("message-id", message_id)
            .header("content-type", "application/json")
            .header("content-length", body.len().to_string())
            .body(body)
    }

    /// Wire form, NUL terminated, with headers escaped where STOMP requires it.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }

    /// Decodes one frame. Returns `Ok(None)` for a heart-beat (bare EOLs).
    ///
    /// # Errors
    /// Returns a [`FrameError`] describing the first violation found.
    pub fn decode(raw: &str) -> Result<Option<Self>, FrameError> {
        let raw = raw.trim_start_matches(['\r', '\n']);
        if raw.is_empty() || raw.chars().all(|c| c == NUL) {
            return Ok(None);
        }

        // The first blank line ends the headers, whichever EOL style it uses.
        let (split_at, separator) = ["\r\n\r\n", "\n\n"]
            .into_iter()
            .filter_map(|separator| raw.find(separator).map(|at| (at, separator)))
            .min_by_key(|(at, _)| *at)
            .ok_or(FrameError::MissingTerminator)?;
        let head = &raw[..split_at];
        let rest = &raw[split_at + separator.len()..];

        let mut lines = head.lines();
        let command: Command = lines.next().unwrap_or_default().trim_end().parse()?;
        let escaped = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if escaped {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let length = headers
            .iter()
            .find(|(name, _)| name == "content-length")
            .map(|(_, value)| {
                value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength(value.clone()))
            })
            .transpose()?;

        let body = match length {
            Some(length) => {
                let body = rest
                    .get(..length)
                    .ok_or_else(|| FrameError::InvalidContentLength(length.to_string()))?;
                if !rest[length..].starts_with(NUL) {
                    return Err(FrameError::MissingTerminator);
                }
                body
            }
            None => rest
                .split_once(NUL)
                .map(|(body, _)| body)
                .ok_or(FrameError::MissingTerminator)?,
        };

        Ok(Some(Self {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}

fn push_escaped(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(value: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(value.to_string())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_message_with_content_length() {
        let body = r#"{"a":"b\u0000"}"#.to_string();
        let raw = Frame::message("/topic/conversation:1", "sub-0", "m-1", body.clone()).encode();

        let frame = Frame::decode(&raw).unwrap().unwrap();
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("destination"), Some("/topic/conversation:1"));
        assert_eq!(frame.get("subscription"), Some("sub-0"));
        assert_eq!(frame.body, body);
    }

    #[test]
    fn escapes_header_values_except_on_connect() {
        let subscribe = Frame::subscribe("sub-1", "/topic/conversation:42").encode();
        assert!(subscribe.contains("destination:/topic/conversation\\c42\n"));
        let decoded = Frame::decode(&subscribe).unwrap().unwrap();
        assert_eq!(decoded.get("destination"), Some("/topic/conversation:42"));

        let connect = Frame::connect("localhost", "abc").encode();
        assert!(connect.contains("Authorization:Bearer abc\n"));
    }

    #[test]
    fn heartbeat_is_not_a_frame() {
        assert_eq!(Frame::decode("\n"), Ok(None));
        assert_eq!(Frame::decode("\r\n\n"), Ok(None));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            Frame::decode("HELLO\n\n\0"),
            Err(FrameError::UnknownCommand("HELLO".into()))
        );
        assert_eq!(
            Frame::decode("MESSAGE\ndestination:/topic/x\n\nbody"),
            Err(FrameError::MissingTerminator)
        );
        assert!(matches!(
            Frame::decode("MESSAGE\nbroken-header\n\n\0"),
            Err(FrameError::MalformedHeader(_))
        ));
        assert!(matches!(
            Frame::decode("MESSAGE\ndestination:a\\tb\n\n\0"),
            Err(FrameError::InvalidEscape(_))
        ));
        assert!(matches!(
            Frame::decode("MESSAGE\ncontent-length:99\n\nshort\0"),
            Err(FrameError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn crlf_frames_keep_blank_lines_in_the_body() {
        let raw = "MESSAGE\r\ndestination:/topic/conversation:1\r\n\r\nfirst\n\nsecond\0";
        let frame = Frame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.get("destination"), Some("/topic/conversation:1"));
        assert_eq!(frame.body, "first\n\nsecond");

        let lf = Frame::decode("MESSAGE\ndestination:a\n\nx\r\n\r\ny\0")
            .unwrap()
            .unwrap();
        assert_eq!(lf.body, "x\r\n\r\ny");
    }

    #[test]
    fn repeated_header_keeps_first_value() {
        let frame = Frame::decode("MESSAGE\nfoo:first\nfoo:second\n\n\0")
            .unwrap()
            .unwrap();
        assert_eq!(frame.get("foo"), Some("first"));
    }
}
