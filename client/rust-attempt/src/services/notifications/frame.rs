//! STOMP 1.2 text frames.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let command = match value {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        };
        Some(command)
    }

    /// CONNECT and CONNECTED headers are sent verbatim.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is incomplete")]
    Incomplete,

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("malformed header line {0:?}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in {0:?}")]
    InvalidEscape(String),

    #[error("content-length does not match body")]
    InvalidContentLength,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header; repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn encode(&self) -> String {
        let escape_headers = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

        for (name, value) in &self.headers {
            if escape_headers {
                out.push_str(&escape(name));
                out.push(':');
                out.push_str(&escape(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Reassembles frames from WebSocket messages that may carry several frames,
/// a partial frame, or bare EOL heart-beats.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
}

impl FrameDecoder {
    pub fn push(&mut self, chunk: &str) -> Result<Vec<Frame>, FrameError> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        loop {
            let trimmed = self.buffer.trim_start_matches(['\n', '\r']);
            if trimmed.len() != self.buffer.len() {
                self.buffer = trimmed.to_string();
            }
            if self.buffer.is_empty() {
                break;
            }

            match decode_one(&self.buffer) {
                Ok((frame, consumed)) => {
                    frames.push(frame);
                    self.buffer.drain(..consumed);
                }
                Err(FrameError::Incomplete) => break,
                Err(e) => {
                    self.buffer.clear();
                    return Err(e);
                }
            }
        }

        Ok(frames)
    }

    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// Decodes every complete frame in `input`.
pub fn decode_frames(input: &str) -> Result<Vec<Frame>, FrameError> {
    let mut decoder = FrameDecoder::default();
    let frames = decoder.push(input)?;
    if decoder.has_partial() {
        return Err(FrameError::Incomplete);
    }
    Ok(frames)
}

/// Decodes one frame from the start of `input`; returns it with the number
/// of bytes consumed.
fn decode_one(input: &str) -> Result<(Frame, usize), FrameError> {
    let (command_line, mut cursor) = next_line(input, 0).ok_or(FrameError::Incomplete)?;
    let command = Command::parse(command_line)
        .ok_or_else(|| FrameError::UnknownCommand(command_line.to_string()))?;

    let mut headers = Vec::new();
    loop {
        let (line, next) = next_line(input, cursor).ok_or(FrameError::Incomplete)?;
        cursor = next;
        if line.is_empty() {
            break;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
        if command.escapes_headers() {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| value.trim().parse::<usize>())
        .transpose()
        .map_err(|_| FrameError::InvalidContentLength)?;

    let rest = &input[cursor..];
    let body_len = match content_length {
        Some(len) => {
            if rest.len() <= len {
                return Err(FrameError::Incomplete);
            }
            if !rest.is_char_boundary(len) || rest.as_bytes()[len] != 0 {
                return Err(FrameError::InvalidContentLength);
            }
            len
        }
        None => rest.find('\0').ok_or(FrameError::Incomplete)?,
    };

    let frame = Frame {
        command,
        headers,
        body: rest[..body_len].to_string(),
    };
    Ok((frame, cursor + body_len + 1))
}

fn next_line(input: &str, from: usize) -> Option<(&str, usize)> {
    let rest = &input[from..];
    let end = rest.find('\n')?;
    let line = &rest[..end];
    let line = line.strip_suffix('\r').unwrap_or(line);
    Some((line, from + end + 1))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
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
