// Frames follow the RESP3 layout: https://redis.io/docs/reference/protocol-spec
//
// Only the tags listed in `DataType` are understood. Every string that may carry user data is
// sent as a length-prefixed bulk so it can safely contain CRLF.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;
use std::string::FromUtf8Error;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

/// Maximum nesting of arrays and maps accepted by the parser.
const MAX_DEPTH: usize = 32;

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("invalid frame data type: {0}")]
    InvalidDataType(u8),
    #[error("protocol error; {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Bulk(Bytes),
    Null,
    Array(Vec<Frame>),
    /// Nested record. Keys are always strings and keep their wire order.
    Map(Vec<(String, Frame)>),
}

impl Frame {
    pub fn bulk(s: impl Into<String>) -> Frame {
        Frame::Bulk(Bytes::from(s.into()))
    }

    pub fn map() -> Frame {
        Frame::Map(vec![])
    }

    /// Appends an entry to a map frame. Does nothing on other frame kinds.
    pub fn insert(&mut self, key: &str, value: Frame) {
        if let Frame::Map(entries) = self {
            entries.push((key.to_string(), value));
        }
    }

    /// Builder flavour of [`Frame::insert`].
    pub fn with(mut self, key: &str, value: Frame) -> Frame {
        self.insert(key, value);
        self
    }

    /// Looks up `key` in a map frame. The first entry wins when a key is repeated.
    pub fn get(&self, key: &str) -> Option<&Frame> {
        match self {
            Frame::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Both simple and bulk frames may hold strings.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Frame::Simple(s) => Some(s),
            Frame::Bulk(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Simple(_) => "simple string",
            Frame::Error(_) => "error",
            Frame::Integer(_) => "integer",
            Frame::Double(_) => "double",
            Frame::Boolean(_) => "boolean",
            Frame::Bulk(_) => "bulk string",
            Frame::Null => "null",
            Frame::Array(_) => "array",
            Frame::Map(_) => "map",
        }
    }

    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_nested(src, 0)
    }

    fn parse_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Self, Error> {
        if depth > MAX_DEPTH {
            return Err("frame nesting is too deep".into());
        }

        // The first byte in an RESP-serialized payload always identifies its type.
        // Subsequent bytes constitute the type's contents.
        let first_byte = get_byte(src)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            DataType::SimpleString => Ok(Frame::Simple(get_line_string(src)?)),
            DataType::SimpleError => Ok(Frame::Error(get_line_string(src)?)),
            DataType::Integer => {
                let string = get_line_string(src)?;
                let integer = string
                    .parse::<i64>()
                    .map_err(|_| Error::Invalid(format!("invalid integer {:?}", string)))?;

                Ok(Frame::Integer(integer))
            }
            DataType::Double => {
                let string = get_line_string(src)?;
                let double = string
                    .parse::<f64>()
                    .map_err(|_| Error::Invalid(format!("invalid double {:?}", string)))?;

                Ok(Frame::Double(double))
            }
            DataType::Boolean => match get_line(src)? {
                b"t" => Ok(Frame::Boolean(true)),
                b"f" => Ok(Frame::Boolean(false)),
                _ => Err("invalid boolean".into()),
            },
            // $<length>\r\n<data>\r\n
            DataType::BulkString => match get_length(src)? {
                None => Ok(Frame::Null),
                Some(length) => Ok(Frame::Bulk(Bytes::copy_from_slice(get_exact(
                    src, length,
                )?))),
            },
            // !<length>\r\n<error>\r\n
            DataType::BulkError => match get_length(src)? {
                // NOTE: the protocol does not specify a way to represent a null bulk error
                None => Ok(Frame::Null),
                Some(length) => {
                    let msg = get_exact(src, length)?.to_vec();
                    Ok(Frame::Error(String::from_utf8(msg)?))
                }
            },
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => {
                let Some(length) = get_length(src)? else {
                    return Ok(Frame::Null);
                };

                // Every element takes at least three bytes, never trust the announced length
                // for the allocation.
                let mut frames = Vec::with_capacity(length.min(src.remaining() / 3));
                for _ in 0..length {
                    frames.push(Self::parse_nested(src, depth + 1)?);
                }

                Ok(Frame::Array(frames))
            }
            // %<number-of-entries>\r\n<key-1><value-1>...<key-n><value-n>
            DataType::Map => {
                let Some(length) = get_length(src)? else {
                    return Ok(Frame::Null);
                };

                let mut entries = Vec::with_capacity(length.min(src.remaining() / 6));
                for _ in 0..length {
                    let key = match Self::parse_nested(src, depth + 1)? {
                        Frame::Simple(s) => s,
                        Frame::Bulk(bytes) => String::from_utf8(bytes.to_vec())?,
                        frame => {
                            return Err(Error::Invalid(format!(
                                "map keys must be strings, got {}",
                                frame.kind()
                            )))
                        }
                    };
                    let value = Self::parse_nested(src, depth + 1)?;
                    entries.push((key, value));
                }

                Ok(Frame::Map(entries))
            }
            DataType::Null => {
                if !get_line(src)?.is_empty() {
                    return Err("invalid null".into());
                }

                Ok(Frame::Null)
            }
        }
    }

    pub fn write_to(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(u8::from(DataType::SimpleString));
                dst.put_slice(s.as_bytes());
                dst.put_slice(CRLF);
            }
            // Errors are written as bulk errors so their text may span lines.
            Frame::Error(s) => {
                dst.put_u8(u8::from(DataType::BulkError));
                put_decimal(dst, s.len());
                dst.put_slice(s.as_bytes());
                dst.put_slice(CRLF);
            }
            Frame::Integer(i) => {
                dst.put_u8(u8::from(DataType::Integer));
                dst.put_slice(i.to_string().as_bytes());
                dst.put_slice(CRLF);
            }
            Frame::Double(d) => {
                dst.put_u8(u8::from(DataType::Double));
                // `Display` for f64 prints the shortest representation that parses back to the
                // same value.
                dst.put_slice(d.to_string().as_bytes());
                dst.put_slice(CRLF);
            }
            Frame::Boolean(b) => {
                dst.put_u8(u8::from(DataType::Boolean));
                dst.put_u8(if *b { b't' } else { b'f' });
                dst.put_slice(CRLF);
            }
            Frame::Bulk(bytes) => {
                dst.put_u8(u8::from(DataType::BulkString));
                put_decimal(dst, bytes.len());
                dst.put_slice(bytes);
                dst.put_slice(CRLF);
            }
            Frame::Null => {
                dst.put_u8(u8::from(DataType::Null));
                dst.put_slice(CRLF);
            }
            Frame::Array(arr) => {
                dst.put_u8(u8::from(DataType::Array));
                put_decimal(dst, arr.len());
                for frame in arr {
                    frame.write_to(dst);
                }
            }
            Frame::Map(entries) => {
                dst.put_u8(u8::from(DataType::Map));
                put_decimal(dst, entries.len());
                for (key, value) in entries {
                    Frame::bulk(key.as_str()).write_to(dst);
                    value.write_to(dst);
                }
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = BytesMut::new();
        self.write_to(&mut bytes);
        bytes.to_vec()
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Frame::Bulk(Bytes::from(s))
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Frame::bulk(s)
    }
}

impl From<i64> for Frame {
    fn from(i: i64) -> Self {
        Frame::Integer(i)
    }
}

impl From<f64> for Frame {
    fn from(d: f64) -> Self {
        Frame::Double(d)
    }
}

impl From<bool> for Frame {
    fn from(b: bool) -> Self {
        Frame::Boolean(b)
    }
}

impl<T: Into<Frame>> From<Option<T>> for Frame {
    fn from(value: Option<T>) -> Self {
        value.map_or(Frame::Null, Into::into)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Double(d) => write!(f, ",{}", d),
            Frame::Boolean(b) => write!(f, "#{}", if *b { 't' } else { 'f' }),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::Null => write!(f, "_"),
            Frame::Array(arr) => {
                write!(f, "*{}[", arr.len())?;
                for (i, frame) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", frame)?;
                }
                write!(f, "]")
            }
            Frame::Map(entries) => {
                write!(f, "%{}{{", entries.len())?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}={}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

fn put_decimal(dst: &mut BytesMut, value: usize) {
    dst.put_slice(value.to_string().as_bytes());
    dst.put_slice(CRLF);
}

fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let end = src.get_ref().len();

    let line_end = src.get_ref()[start..end]
        .windows(2)
        .position(|window| window == CRLF)
        .ok_or(Error::Incomplete)
        .map(|index| start + index)?;

    src.set_position((line_end + CRLF.len()) as u64);

    Ok(&src.get_ref()[start..line_end])
}

fn get_line_string(src: &mut Cursor<&[u8]>) -> Result<String, Error> {
    let bytes = get_line(src)?.to_vec();
    Ok(String::from_utf8(bytes)?)
}

/// Reads a length line. `-1` is the RESP2 null marker and maps to `None`.
fn get_length(src: &mut Cursor<&[u8]>) -> Result<Option<usize>, Error> {
    let line = get_line(src)?;
    let line = std::str::from_utf8(line).map_err(|_| Error::from("invalid length"))?;

    match line.parse::<i64>() {
        Ok(-1) => Ok(None),
        Ok(length) if length >= 0 => usize::try_from(length)
            .map(Some)
            .map_err(|_| "invalid length".into()),
        _ => Err(Error::Invalid(format!("invalid length {:?}", line))),
    }
}

/// Reads `length` bytes followed by CRLF.
fn get_exact<'a>(src: &mut Cursor<&'a [u8]>, length: usize) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let data_end = start.checked_add(length).ok_or(Error::Incomplete)?;
    let frame_end = data_end + CRLF.len();

    if src.get_ref().len() < frame_end {
        return Err(Error::Incomplete);
    }

    if &src.get_ref()[data_end..frame_end] != CRLF {
        return Err("bulk payload is not terminated by CRLF".into());
    }

    src.set_position(frame_end as u64);

    Ok(&src.get_ref()[start..data_end])
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    BulkString,   // '$'
    SimpleError,  // '-'
    BulkError,    // '!'
    Boolean,      // '#'
    Integer,      // ':'
    Double,       // ','
    Array,        // '*'
    Map,          // '%'
    Null,         // '_'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'!' => Ok(Self::BulkError),
            b'*' => Ok(Self::Array),
            b'_' => Ok(Self::Null),
            b'#' => Ok(Self::Boolean),
            b',' => Ok(Self::Double),
            b'%' => Ok(Self::Map),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::BulkError => b'!',
            DataType::Array => b'*',
            DataType::Null => b'_',
            DataType::Boolean => b'#',
            DataType::Double => b',',
            DataType::Map => b'%',
        }
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_src: FromUtf8Error) -> Error {
        "invalid UTF-8 string".into()
    }
}

impl From<&str> for Error {
    fn from(src: &str) -> Error {
        src.to_string().into()
    }
}

impl From<String> for Error {
    fn from(src: String) -> Error {
        Error::Invalid(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &[u8]) -> Result<Frame, Error> {
        let mut cursor = Cursor::new(data);
        Frame::parse(&mut cursor)
    }

    #[test]
    fn parse_simple_string_frame() {
        let frame = parse(b"+OK\r\n");

        assert!(matches!(frame, Ok(Frame::Simple(ref s)) if s == "OK"));
    }

    #[test]
    fn parse_simple_error_frame() {
        let frame = parse(b"-Error message\r\n");

        assert!(matches!(
            frame,
            Ok(Frame::Error(ref s)) if s == "Error message"
        ));
    }

    fn parse_integer_frame(data: &[u8], expected: i64) {
        let frame = parse(data);

        assert!(matches!(frame, Ok(Frame::Integer(i)) if i == expected));
    }

    #[test]
    fn parse_integer_frame_positive() {
        parse_integer_frame(b":1000\r\n", 1000);
    }

    #[test]
    fn parse_integer_frame_negative() {
        parse_integer_frame(b":-1000\r\n", -1000);
    }

    #[test]
    fn parse_integer_frame_positive_singned() {
        parse_integer_frame(b":+1000\r\n", 1000);
    }

    #[test]
    fn parse_integer_frame_garbage() {
        assert!(matches!(parse(b":12a\r\n"), Err(Error::Invalid(_))));
    }

    #[test]
    fn parse_double_frame() {
        assert_eq!(parse(b",-584.25\r\n"), Ok(Frame::Double(-584.25)));
        assert_eq!(parse(b",3\r\n"), Ok(Frame::Double(3.0)));
    }

    #[test]
    fn parse_boolean_frame() {
        assert_eq!(parse(b"#t\r\n"), Ok(Frame::Boolean(true)));
        assert_eq!(parse(b"#f\r\n"), Ok(Frame::Boolean(false)));
        assert!(matches!(parse(b"#x\r\n"), Err(Error::Invalid(_))));
    }

    #[test]
    fn parse_bulk_string_frame() {
        let frame = parse(b"$6\r\nfoobar\r\n");

        assert_eq!(frame, Ok(Frame::Bulk(Bytes::from("foobar"))));
    }

    #[test]
    fn parse_bulk_string_frame_containing_crlf() {
        let frame = parse(b"$8\r\nfoo\r\nbar\r\n");

        assert_eq!(frame, Ok(Frame::Bulk(Bytes::from("foo\r\nbar"))));
    }

    #[test]
    fn parse_bulk_string_frame_empty() {
        assert_eq!(parse(b"$0\r\n\r\n"), Ok(Frame::Bulk(Bytes::from(""))));
    }

    #[test]
    fn parse_bulk_string_frame_null() {
        assert_eq!(parse(b"$-1\r\n"), Ok(Frame::Null));
    }

    #[test]
    fn parse_bulk_string_frame_truncated() {
        assert_eq!(parse(b"$6\r\nfoo"), Err(Error::Incomplete));
    }

    #[test]
    fn parse_bulk_string_frame_wrong_terminator() {
        assert!(matches!(parse(b"$3\r\nfoobar\r\n"), Err(Error::Invalid(_))));
    }

    #[test]
    fn parse_bulk_error_frame() {
        assert_eq!(parse(b"!6\r\nfoobar\r\n"), Ok(Frame::Error("foobar".into())));
    }

    #[test]
    fn parse_null_frame() {
        assert_eq!(parse(b"_\r\n"), Ok(Frame::Null));
    }

    #[test]
    fn parse_array_frame_empty() {
        assert_eq!(parse(b"*0\r\n"), Ok(Frame::Array(vec![])));
    }

    #[test]
    fn parse_array_frame_nested() {
        let data = b"*2\r\n*3\r\n:1\r\n:2\r\n:3\r\n*2\r\n+Hello\r\n-World\r\n";

        assert_eq!(
            parse(data),
            Ok(Frame::Array(vec![
                Frame::Array(vec![
                    Frame::Integer(1),
                    Frame::Integer(2),
                    Frame::Integer(3)
                ]),
                Frame::Array(vec![
                    Frame::Simple("Hello".to_string()),
                    Frame::Error("World".to_string())
                ]),
            ]))
        );
    }

    #[test]
    fn parse_array_frame_with_huge_announced_length() {
        assert_eq!(parse(b"*9999999999\r\n:1\r\n"), Err(Error::Incomplete));
    }

    #[test]
    fn parse_map_frame() {
        let data = b"%2\r\n$4\r\nname\r\n$4\r\nMuse\r\n+coordinates\r\n%1\r\n+x\r\n,1.5\r\n";

        assert_eq!(
            parse(data),
            Ok(Frame::map().with("name", "Muse".into()).with(
                "coordinates",
                Frame::map().with("x", Frame::Double(1.5))
            ))
        );
    }

    #[test]
    fn parse_map_frame_with_non_string_key() {
        assert!(matches!(parse(b"%1\r\n:1\r\n:2\r\n"), Err(Error::Invalid(_))));
    }

    #[test]
    fn parse_unknown_data_type() {
        assert_eq!(parse(b"~1\r\n:1\r\n"), Err(Error::InvalidDataType(b'~')));
    }

    #[test]
    fn parse_rejects_deep_nesting() {
        let data = "*1\r\n".repeat(MAX_DEPTH + 2) + ":1\r\n";

        assert!(matches!(parse(data.as_bytes()), Err(Error::Invalid(_))));
    }

    #[test]
    fn serialize_then_parse_preserves_every_tag() {
        let frame = Frame::Array(vec![
            Frame::Simple("OK".into()),
            Frame::Error("multi\r\nline".into()),
            Frame::Integer(i64::MIN),
            Frame::Double(0.1 + 0.2),
            Frame::Double(f64::INFINITY),
            Frame::Boolean(true),
            Frame::bulk("bulk\r\nwith crlf"),
            Frame::Null,
            Frame::map()
                .with("nested", Frame::Array(vec![Frame::Integer(1)]))
                .with("empty", Frame::map()),
        ]);

        assert_eq!(parse(&frame.serialize()), Ok(frame));
    }

    #[test]
    fn map_lookup_returns_first_matching_key() {
        let frame = Frame::map()
            .with("a", Frame::Integer(1))
            .with("a", Frame::Integer(2));

        assert_eq!(frame.get("a"), Some(&Frame::Integer(1)));
        assert_eq!(frame.get("b"), None);
        assert_eq!(Frame::Null.get("a"), None);
    }
}
