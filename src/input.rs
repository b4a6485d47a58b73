//! Turns a line typed by a user into a command name and its argument frames.
//!
//! ```text
//! add name="Pink Floyd" x=1 y=2 participants=5 genre=psychedelic_rock studio="Abbey Road"
//! update-by-id 3 participants=4
//! filter-by-predicate name match "The *"
//! ```
//!
//! Plain words become string arguments. `key=value` words with a band field as key are
//! collected into one band map appended after the plain arguments.

use thiserror::Error as ThisError;

use crate::frame::Frame;

/// Keys understood in `key=value` words.
pub const BAND_KEYS: [&str; 7] = [
    "name",
    "x",
    "y",
    "participants",
    "established",
    "genre",
    "studio",
];

#[derive(Debug, ThisError, PartialEq)]
pub enum InputError {
    #[error("unterminated quote")]
    UnterminatedQuote,
    #[error("`{key}` {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("`{0}` is given more than once")]
    DuplicateKey(String),
}

#[derive(Debug, PartialEq)]
pub struct Line {
    pub command: String,
    pub args: Vec<Frame>,
}

/// Parses one line. Blank lines and lines starting with `#` yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Line>, InputError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut words = split(line)?.into_iter();
    let Some(command) = words.next().map(|word| word.text) else {
        return Ok(None);
    };

    let mut args = Vec::new();
    let mut band = BandBuilder::default();
    for word in words {
        match word.band_field() {
            Some((key, value)) => band.set(key, value)?,
            None => args.push(Frame::bulk(word.text)),
        }
    }

    if let Some(band) = band.build() {
        args.push(band);
    }

    Ok(Some(Line { command, args }))
}

/// Splits on whitespace. Double quotes group words and may appear anywhere in a word, so
/// `name="Pink Floyd"` is a single word. `\"` and `\\` escape inside quotes.
pub fn tokenize(line: &str) -> Result<Vec<String>, InputError> {
    Ok(split(line)?.into_iter().map(|word| word.text).collect())
}

struct Word {
    text: String,
    // Length of the part before the first quote, if the word has one.
    unquoted_len: Option<usize>,
}

impl Word {
    /// `key=value` with a band key, as long as the key and `=` are outside quotes.
    fn band_field(&self) -> Option<(&str, &str)> {
        let (key, value) = self.text.split_once('=')?;
        let unquoted = self.unquoted_len.map_or(true, |len| key.len() < len);
        (unquoted && BAND_KEYS.contains(&key)).then_some((key, value))
    }
}

fn split(line: &str) -> Result<Vec<Word>, InputError> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut unquoted_len = None;
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
                unquoted_len.get_or_insert(word.len());
            }
            '\\' if quoted => match chars.next() {
                Some(escaped) => word.push(escaped),
                None => return Err(InputError::UnterminatedQuote),
            },
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(Word {
                        text: std::mem::take(&mut word),
                        unquoted_len: unquoted_len.take(),
                    });
                    in_word = false;
                }
            }
            c => {
                word.push(c);
                in_word = true;
            }
        }
    }

    if quoted {
        return Err(InputError::UnterminatedQuote);
    }
    if in_word {
        words.push(Word {
            text: word,
            unquoted_len,
        });
    }

    Ok(words)
}

#[derive(Default)]
struct BandBuilder {
    fields: Vec<(String, Frame)>,
    x: Option<f64>,
    y: Option<f64>,
    seen: Vec<String>,
}

impl BandBuilder {
    fn set(&mut self, key: &str, value: &str) -> Result<(), InputError> {
        if self.seen.iter().any(|k| k == key) {
            return Err(InputError::DuplicateKey(key.to_string()));
        }
        self.seen.push(key.to_string());

        match key {
            "x" => self.x = Some(number(key, value)?),
            "y" => self.y = Some(number(key, value)?),
            "participants" => {
                let participants = value.parse::<i64>().map_err(|_| InputError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("must be an integer, got {:?}", value),
                })?;
                self.fields.push((key.to_string(), Frame::Integer(participants)));
            }
            "studio" => self.fields.push((
                key.to_string(),
                Frame::map().with("address", Frame::bulk(value)),
            )),
            _ => self.fields.push((key.to_string(), Frame::bulk(value))),
        }

        Ok(())
    }

    fn build(self) -> Option<Frame> {
        if self.seen.is_empty() {
            return None;
        }

        let mut band = Frame::Map(self.fields);
        if self.x.is_some() || self.y.is_some() {
            // A half-given pair is left for the server to reject.
            let mut coordinates = Frame::map();
            if let Some(x) = self.x {
                coordinates.insert("x", Frame::Double(x));
            }
            if let Some(y) = self.y {
                coordinates.insert("y", Frame::Double(y));
            }
            band.insert("coordinates", coordinates);
        }
        Some(band)
    }
}

fn number(key: &str, value: &str) -> Result<f64, InputError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| InputError::InvalidValue {
            key: key.to_string(),
            reason: format!("must be a number, got {:?}", value),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_words() {
        assert_eq!(
            tokenize(r#"add name="Pink Floyd" studio="Abbey \"Road\"""#).unwrap(),
            vec!["add", "name=Pink Floyd", r#"studio=Abbey "Road""#]
        );
        assert_eq!(tokenize(r#"a "" b"#).unwrap(), vec!["a", "", "b"]);
        assert_eq!(tokenize("  spaced   out  ").unwrap(), vec!["spaced", "out"]);
        assert_eq!(tokenize(r#"add "oops"#), Err(InputError::UnterminatedQuote));
    }

    #[test]
    fn add_line() {
        let line = parse_line(
            r#"add name="Pink Floyd" x=1 y=-2.5 participants=5 genre=pop studio=London"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(line.command, "add");
        assert_eq!(
            line.args,
            vec![Frame::map()
                .with("name", Frame::bulk("Pink Floyd"))
                .with("participants", Frame::Integer(5))
                .with("genre", Frame::bulk("pop"))
                .with("studio", Frame::map().with("address", Frame::bulk("London")))
                .with(
                    "coordinates",
                    Frame::map()
                        .with("x", Frame::Double(1.0))
                        .with("y", Frame::Double(-2.5))
                )]
        );
    }

    #[test]
    fn positional_arguments_come_first() {
        let line = parse_line("update-by-id participants=3 7").unwrap().unwrap();

        assert_eq!(
            line.args,
            vec![
                Frame::bulk("7"),
                Frame::map().with("participants", Frame::Integer(3)),
            ]
        );
    }

    #[test]
    fn unknown_keys_stay_positional() {
        let line = parse_line(r#"filter-by-predicate name match "a=b""#)
            .unwrap()
            .unwrap();

        assert_eq!(
            line.args,
            vec![Frame::bulk("name"), Frame::bulk("match"), Frame::bulk("a=b")]
        );
    }

    #[test]
    fn quoted_key_stays_positional() {
        let line = parse_line(r#"filter-by-predicate name eq "name=X""#)
            .unwrap()
            .unwrap();

        assert_eq!(
            line.args,
            vec![Frame::bulk("name"), Frame::bulk("eq"), Frame::bulk("name=X")]
        );
    }

    #[test]
    fn blank_and_comment_lines() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(parse_line("# a comment"), Ok(None));
    }

    #[test]
    fn bad_values() {
        assert!(matches!(
            parse_line("add participants=many"),
            Err(InputError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_line("add x=inf"),
            Err(InputError::InvalidValue { .. })
        ));
        assert_eq!(
            parse_line("add name=a name=b"),
            Err(InputError::DuplicateKey("name".to_string()))
        );
    }
}
