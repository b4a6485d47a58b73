use std::fmt;
use std::str::FromStr;

use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error as ThisError;

use crate::frame::Frame;

/// Token used by the server when it can't tell which request a response belongs to.
pub const UNCORRELATED: u64 = 0;

#[derive(Debug, ThisError, PartialEq)]
pub enum MessageError {
    #[error("expected a map frame, got {0}")]
    NotAMap(&'static str),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be {expected}, got {actual}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("unknown status {0:?}")]
    UnknownStatus(String),
}

/// A command invocation sent by a client.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub token: u64,
    pub command: String,
    pub args: Vec<Frame>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    /// Framing or codec failure. The server closes the connection after sending it.
    MalformedMessage,
    UnknownCommand,
    InvalidArgument,
    InternalError,
    PersistenceFailure,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub token: u64,
    pub status: Status,
    pub message: String,
    pub payload: Option<Frame>,
}

impl Request {
    pub fn new(token: u64, command: impl Into<String>, args: Vec<Frame>) -> Request {
        Request {
            token,
            command: command.into(),
            args,
        }
    }

    pub fn into_frame(self) -> Frame {
        Frame::map()
            .with("token", token_frame(self.token))
            .with("command", Frame::from(self.command))
            .with("args", Frame::Array(self.args))
    }
}

impl TryFrom<Frame> for Request {
    type Error = MessageError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        let mut fields = Fields::new(frame)?;

        Ok(Request {
            token: fields.token()?,
            command: fields.string("command")?,
            args: match fields.take("args")? {
                Frame::Array(args) => args,
                frame => return Err(invalid("args", "an array", &frame)),
            },
        })
    }
}

impl Response {
    pub fn ok(message: impl Into<String>, payload: Option<Frame>) -> Response {
        Response {
            token: UNCORRELATED,
            status: Status::Ok,
            message: message.into(),
            payload,
        }
    }

    pub fn error(status: Status, message: impl Into<String>) -> Response {
        Response {
            token: UNCORRELATED,
            status,
            message: message.into(),
            payload: None,
        }
    }

    pub fn malformed() -> Response {
        Response::error(Status::MalformedMessage, "malformed")
    }

    pub fn with_token(mut self, token: u64) -> Response {
        self.token = token;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn into_frame(self) -> Frame {
        let mut frame = Frame::map()
            .with("token", token_frame(self.token))
            .with("status", Frame::Simple(self.status.to_string()))
            .with("message", Frame::from(self.message));

        if let Some(payload) = self.payload {
            frame.insert("payload", payload);
        }

        frame
    }
}

impl TryFrom<Frame> for Response {
    type Error = MessageError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        let mut fields = Fields::new(frame)?;

        let status = fields.string("status")?;
        let status = Status::from_str(&status).map_err(|_| MessageError::UnknownStatus(status))?;

        Ok(Response {
            token: fields.token()?,
            status,
            message: fields.string("message")?,
            payload: fields.take_optional("payload"),
        })
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.status, self.message)
    }
}

/// The token is an unsigned 64-bit value carried in a signed integer frame.
fn token_frame(token: u64) -> Frame {
    Frame::Integer(token as i64)
}

fn invalid(field: &'static str, expected: &'static str, actual: &Frame) -> MessageError {
    MessageError::InvalidField {
        field,
        expected,
        actual: actual.kind(),
    }
}

/// Owned view over the entries of a map frame. Keys nobody asks for are ignored, which keeps
/// older peers compatible with newer envelopes.
struct Fields {
    entries: Vec<(String, Frame)>,
}

impl Fields {
    fn new(frame: Frame) -> Result<Fields, MessageError> {
        match frame {
            Frame::Map(entries) => Ok(Fields { entries }),
            frame => Err(MessageError::NotAMap(frame.kind())),
        }
    }

    fn take_optional(&mut self, key: &str) -> Option<Frame> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.swap_remove(index).1)
    }

    fn take(&mut self, key: &'static str) -> Result<Frame, MessageError> {
        self.take_optional(key)
            .ok_or(MessageError::MissingField(key))
    }

    fn string(&mut self, key: &'static str) -> Result<String, MessageError> {
        let frame = self.take(key)?;
        match frame.as_str() {
            Some(s) => Ok(s.to_string()),
            None => Err(invalid(key, "a string", &frame)),
        }
    }

    fn token(&mut self) -> Result<u64, MessageError> {
        match self.take("token")? {
            Frame::Integer(i) => Ok(i as u64),
            frame => Err(invalid("token", "an integer", &frame)),
        }
    }
}
