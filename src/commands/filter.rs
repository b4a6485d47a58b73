use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use glob_match::glob_match;
use strum_macros::{Display, EnumString};

use crate::commands::executable::{Context, Executable};
use crate::commands::{CommandError, CommandParser, CommandParserError, Reply};
use crate::frame::Frame;
use crate::model::{self, MusicGenre, Record};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Field {
    Id,
    Name,
    X,
    Y,
    Participants,
    Established,
    Genre,
    Studio,
    Created,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Op {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    /// Glob pattern on a textual field: `*`, `?`, `[...]` and `{a,b}`.
    Match,
}

/// A typed operand. Comparisons only happen between values of the same kind.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Integer(i64),
    Number(f64),
    Text(String),
    Date(NaiveDate),
    Genre(MusicGenre),
    Timestamp(DateTime<Utc>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    pub field: Field,
    pub op: Op,
    pub value: Value,
}

#[derive(Debug, PartialEq)]
pub struct FilterByPredicate {
    pub predicate: Predicate,
}

impl Executable for FilterByPredicate {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        let matches: Vec<Frame> = ctx
            .read()
            .iter()
            .filter(|record| self.predicate.matches(record))
            .map(Frame::from)
            .collect();

        Ok(Reply::new(format!("{} bands match", matches.len())).with_payload(Frame::Array(matches)))
    }
}

impl TryFrom<&mut CommandParser> for FilterByPredicate {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let field = parser.next_string()?;
        let field = Field::from_str(&field).map_err(|_| CommandParserError::InvalidArgument {
            argument: "field",
            reason: format!(
                "unknown field {:?}, expected one of id, name, x, y, participants, established, genre, studio, created",
                field
            ),
        })?;

        let op = parser.next_string()?;
        let op = Op::from_str(&op).map_err(|_| CommandParserError::InvalidArgument {
            argument: "op",
            reason: format!("unknown operator {:?}, expected lt, le, eq, ne, ge, gt or match", op),
        })?;

        let value = parser.next_frame()?;
        let value = match op {
            Op::Match => pattern(field, &value)?,
            _ => field.parse_value(&value)?,
        };

        Ok(Self {
            predicate: Predicate { field, op, value },
        })
    }
}

impl Predicate {
    /// A record whose field is absent never matches, whatever the operator.
    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = self.field.extract(record) else {
            return false;
        };

        if let (Op::Match, Value::Text(pattern)) = (self.op, &self.value) {
            return match &actual {
                Value::Text(text) => glob_match(pattern, text),
                Value::Genre(genre) => glob_match(&pattern.to_uppercase(), genre.as_ref()),
                _ => false,
            };
        }

        let Some(ordering) = actual.compare(&self.value) else {
            return false;
        };

        match self.op {
            Op::Lt => ordering == Ordering::Less,
            Op::Le => ordering != Ordering::Greater,
            Op::Eq => ordering == Ordering::Equal,
            Op::Ne => ordering != Ordering::Equal,
            Op::Ge => ordering != Ordering::Less,
            Op::Gt => ordering == Ordering::Greater,
            Op::Match => false,
        }
    }
}

impl Field {
    fn extract(self, record: &Record) -> Option<Value> {
        let band = &record.band;
        match self {
            Field::Id => Some(Value::Integer(record.id as i64)),
            Field::Name => Some(Value::Text(band.name.clone())),
            Field::X => Some(Value::Number(band.coordinates.x)),
            Field::Y => Some(Value::Number(band.coordinates.y)),
            Field::Participants => band.participants.map(Value::Integer),
            Field::Established => band.established.map(Value::Date),
            Field::Genre => band.genre.map(Value::Genre),
            Field::Studio => Some(Value::Text(band.studio.address.clone())),
            Field::Created => Some(Value::Timestamp(record.created_at)),
        }
    }

    /// Reads `frame` as an operand for this field. Strings are accepted for every kind, so values
    /// typed on a command line work as-is.
    fn parse_value(self, frame: &Frame) -> Result<Value, CommandParserError> {
        let invalid = |expected: &str| CommandParserError::InvalidArgument {
            argument: "value",
            reason: format!("{} expects {}, got {}", self, expected, frame),
        };

        let text = frame.as_str().map(str::trim);
        match self {
            Field::Id | Field::Participants => match (frame, text) {
                (Frame::Integer(i), _) => Ok(Value::Integer(*i)),
                (_, Some(s)) => s.parse().map(Value::Integer).map_err(|_| invalid("an integer")),
                _ => Err(invalid("an integer")),
            },
            Field::X | Field::Y => {
                let number = match (frame, text) {
                    (Frame::Double(d), _) => Some(*d),
                    (Frame::Integer(i), _) => Some(*i as f64),
                    (_, Some(s)) => s.parse::<f64>().ok(),
                    _ => None,
                };
                number
                    .filter(|n| n.is_finite())
                    .map(Value::Number)
                    .ok_or_else(|| invalid("a finite number"))
            }
            Field::Name | Field::Studio => frame
                .as_str()
                .map(|s| Value::Text(s.to_string()))
                .ok_or_else(|| invalid("a string")),
            Field::Established => text
                .and_then(|s| NaiveDate::from_str(s).ok())
                .map(Value::Date)
                .ok_or_else(|| invalid("a YYYY-MM-DD date")),
            Field::Genre => text
                .and_then(|s| MusicGenre::from_str(s).ok())
                .map(Value::Genre)
                .ok_or_else(|| invalid(&format!("one of {}", model::genres()))),
            Field::Created => text
                .and_then(model::parse_timestamp)
                .map(Value::Timestamp)
                .ok_or_else(|| invalid("an RFC 3339 timestamp")),
        }
    }
}

fn pattern(field: Field, frame: &Frame) -> Result<Value, CommandParserError> {
    if !matches!(field, Field::Name | Field::Studio | Field::Genre) {
        return Err(CommandParserError::InvalidArgument {
            argument: "op",
            reason: format!("match only applies to name, studio and genre, not {}", field),
        });
    }

    frame
        .as_str()
        .map(|s| Value::Text(s.to_string()))
        .ok_or_else(|| CommandParserError::InvalidArgument {
            argument: "value",
            reason: format!("pattern must be a string, got {}", frame.kind()),
        })
}

impl Value {
    fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Genre(a), Value::Genre(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}
