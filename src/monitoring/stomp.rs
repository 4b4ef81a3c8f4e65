//! Minimal STOMP 1.2 client-side framing over a WebSocket text transport.
//! Only the commands the dashboard session exchanges are modeled.

use crate::error::MonitorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Message,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Message => "MESSAGE",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "CONNECT" => Some(Self::Connect),
            "CONNECTED" => Some(Self::Connected),
            "SUBSCRIBE" => Some(Self::Subscribe),
            "UNSUBSCRIBE" => Some(Self::Unsubscribe),
            "MESSAGE" => Some(Self::Message),
            "ERROR" => Some(Self::Error),
            "DISCONNECT" => Some(Self::Disconnect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// One inbound text payload: either a real frame or a bare heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    Heartbeat,
    Frame(Frame),
}

pub const HEARTBEAT_PAYLOAD: &str = "\n";

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn connect(host: &str, heartbeat_ms: u64) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", &format!("{heartbeat_ms},{heartbeat_ms}"))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            out.push_str(&escape_header(name));
            out.push(':');
            out.push_str(&escape_header(value));
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

pub fn parse_wire(payload: &str) -> Result<WireEvent, MonitorError> {
    if payload.is_empty() || payload == "\n" || payload == "\r\n" {
        return Ok(WireEvent::Heartbeat);
    }

    let payload = payload.strip_suffix('\0').unwrap_or(payload);
    let mut lines = payload.split('\n');

    let raw_command_line = lines
        .next()
        .ok_or_else(|| MonitorError::MalformedFrame("empty frame".to_string()))?;
    let command_line = raw_command_line.trim_end_matches('\r');
    let command = Command::parse(command_line).ok_or_else(|| {
        MonitorError::MalformedFrame(format!("unknown command '{command_line}'"))
    })?;

    let mut headers = Vec::new();
    let mut consumed = raw_command_line.len() + 1;
    for line in lines {
        let trimmed = line.trim_end_matches('\r');
        consumed += line.len() + 1;
        if trimmed.is_empty() {
            break;
        }
        let Some((name, value)) = trimmed.split_once(':') else {
            return Err(MonitorError::MalformedFrame(format!(
                "header line '{trimmed}' has no separator"
            )));
        };
        headers.push((unescape_header(name), unescape_header(value)));
    }

    let body = payload.get(consumed..).unwrap_or_default().to_string();

    Ok(WireEvent::Frame(Frame {
        command,
        headers,
        body,
    }))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// `heart-beat` header value, e.g. `"4000,4000"`.
pub fn parse_heartbeat_header(raw: &str) -> Option<(u64, u64)> {
    let (outgoing, incoming) = raw.trim().split_once(',')?;
    Some((
        outgoing.trim().parse::<u64>().ok()?,
        incoming.trim().parse::<u64>().ok()?,
    ))
}

/// Negotiates effective heartbeat intervals from both sides' declarations.
/// Returns (client send interval, expected server send interval); 0 disables
/// a direction when either side declared 0 for it.
pub fn negotiate_heartbeat(client: (u64, u64), server: (u64, u64)) -> (u64, u64) {
    let (client_send, client_expect) = client;
    let (server_send, server_expect) = server;

    let outgoing = if client_send == 0 || server_expect == 0 {
        0
    } else {
        client_send.max(server_expect)
    };
    let incoming = if client_expect == 0 || server_send == 0 {
        0
    } else {
        client_expect.max(server_send)
    };
    (outgoing, incoming)
}
