//! Music band records and the rules a band must satisfy before the collection accepts it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use strum_macros::{AsRefStr, Display, EnumString, VariantNames};
use thiserror::Error as ThisError;

use crate::frame::Frame;

/// Smallest accepted `x` coordinate.
pub const MIN_X: f64 = -584.0;

#[derive(Debug, ThisError, PartialEq)]
pub enum ValidationError {
    #[error("field `{0}` is required")]
    Missing(&'static str),
    #[error("field `{field}` {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ValidationError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> ValidationError {
        ValidationError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, AsRefStr, VariantNames,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum MusicGenre {
    PsychedelicRock,
    Rap,
    Pop,
    PostRock,
    PunkRock,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Studio {
    pub address: String,
}

/// The user-controlled part of a record.
#[derive(Clone, Debug, PartialEq)]
pub struct MusicBand {
    pub name: String,
    pub coordinates: Coordinates,
    pub participants: Option<i64>,
    pub established: Option<NaiveDate>,
    pub genre: Option<MusicGenre>,
    pub studio: Studio,
}

/// A band as stored in the collection. `id` and `created_at` are assigned by the server and
/// never change afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub band: MusicBand,
}

/// A band as typed by a user: any field may be missing. `add` needs every required field,
/// `update-by-id` only overrides the fields that are present.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MusicBandDraft {
    pub name: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub participants: Option<i64>,
    pub established: Option<NaiveDate>,
    pub genre: Option<MusicGenre>,
    pub studio: Option<Studio>,
}

impl MusicBand {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::invalid("name", "must not be blank"));
        }

        let Coordinates { x, y } = self.coordinates;
        if !x.is_finite() || x < MIN_X {
            return Err(ValidationError::invalid(
                "coordinates.x",
                format!("must be a finite number not less than {}", MIN_X),
            ));
        }
        if !y.is_finite() {
            return Err(ValidationError::invalid(
                "coordinates.y",
                "must be a finite number",
            ));
        }

        if let Some(participants) = self.participants {
            if participants <= 0 {
                return Err(ValidationError::invalid(
                    "participants",
                    "must be greater than zero",
                ));
            }
        }

        if self.studio.address.trim().is_empty() {
            return Err(ValidationError::invalid(
                "studio.address",
                "must not be blank",
            ));
        }

        Ok(())
    }
}

impl MusicBandDraft {
    /// Builds a complete band. Fails if a required field is missing or a rule is broken.
    pub fn into_band(self) -> Result<MusicBand, ValidationError> {
        let band = MusicBand {
            name: self.name.ok_or(ValidationError::Missing("name"))?,
            coordinates: self
                .coordinates
                .ok_or(ValidationError::Missing("coordinates"))?,
            participants: self.participants,
            established: self.established,
            genre: self.genre,
            studio: self.studio.ok_or(ValidationError::Missing("studio"))?,
        };
        band.validate()?;
        Ok(band)
    }

    /// Overlays the present fields on top of `band` and validates the result.
    pub fn apply_to(self, band: &MusicBand) -> Result<MusicBand, ValidationError> {
        let merged = MusicBand {
            name: self.name.unwrap_or_else(|| band.name.clone()),
            coordinates: self.coordinates.unwrap_or(band.coordinates),
            participants: self.participants.or(band.participants),
            established: self.established.or(band.established),
            genre: self.genre.or(band.genre),
            studio: self.studio.unwrap_or_else(|| band.studio.clone()),
        };
        merged.validate()?;
        Ok(merged)
    }

    pub fn is_empty(&self) -> bool {
        *self == MusicBandDraft::default()
    }
}

impl From<&MusicBand> for MusicBandDraft {
    fn from(band: &MusicBand) -> Self {
        MusicBandDraft {
            name: Some(band.name.clone()),
            coordinates: Some(band.coordinates),
            participants: band.participants,
            established: band.established,
            genre: band.genre,
            studio: Some(band.studio.clone()),
        }
    }
}

// Wire representation.
//
// A record is a flat map with two nested maps (`coordinates` and `studio`). Optional fields that
// are absent are sent as null. Keys that aren't listed here are ignored when decoding.

impl From<&MusicBandDraft> for Frame {
    fn from(draft: &MusicBandDraft) -> Self {
        let mut frame = Frame::map();
        if let Some(name) = &draft.name {
            frame.insert("name", Frame::bulk(name.as_str()));
        }
        if let Some(coordinates) = draft.coordinates {
            frame.insert("coordinates", coordinates_frame(coordinates));
        }
        if let Some(participants) = draft.participants {
            frame.insert("participants", Frame::Integer(participants));
        }
        if let Some(established) = draft.established {
            frame.insert("established", Frame::bulk(established.to_string()));
        }
        if let Some(genre) = draft.genre {
            frame.insert("genre", Frame::bulk(genre.as_ref()));
        }
        if let Some(studio) = &draft.studio {
            frame.insert("studio", studio_frame(studio));
        }
        frame
    }
}

impl From<&Record> for Frame {
    fn from(record: &Record) -> Self {
        let band = &record.band;
        Frame::map()
            .with("id", Frame::Integer(record.id as i64))
            .with("created_at", Frame::bulk(format_timestamp(&record.created_at)))
            .with("name", Frame::bulk(band.name.as_str()))
            .with("coordinates", coordinates_frame(band.coordinates))
            .with("participants", Frame::from(band.participants))
            .with(
                "established",
                Frame::from(band.established.map(|date| date.to_string())),
            )
            .with("genre", Frame::from(band.genre.map(|g| g.to_string())))
            .with("studio", studio_frame(&band.studio))
    }
}

impl TryFrom<&Frame> for MusicBandDraft {
    type Error = ValidationError;

    fn try_from(frame: &Frame) -> Result<Self, Self::Error> {
        if !matches!(frame, Frame::Map(_)) {
            return Err(ValidationError::invalid(
                "band",
                format!("must be a map, got {}", frame.kind()),
            ));
        }

        Ok(MusicBandDraft {
            name: field(frame, "name").map(|f| string(f, "name")).transpose()?,
            coordinates: field(frame, "coordinates")
                .map(coordinates)
                .transpose()?,
            participants: field(frame, "participants")
                .map(|f| integer(f, "participants"))
                .transpose()?,
            established: field(frame, "established")
                .map(|f| date(f, "established"))
                .transpose()?,
            genre: field(frame, "genre").map(genre).transpose()?,
            studio: field(frame, "studio").map(studio).transpose()?,
        })
    }
}

impl TryFrom<&Frame> for Record {
    type Error = ValidationError;

    fn try_from(frame: &Frame) -> Result<Self, Self::Error> {
        let id = field(frame, "id")
            .ok_or(ValidationError::Missing("id"))
            .and_then(|f| integer(f, "id"))?;
        if id <= 0 {
            return Err(ValidationError::invalid("id", "must be positive"));
        }

        let created_at = field(frame, "created_at")
            .ok_or(ValidationError::Missing("created_at"))
            .and_then(|f| string(f, "created_at"))?;
        let created_at = parse_timestamp(&created_at)
            .ok_or_else(|| ValidationError::invalid("created_at", "must be an RFC 3339 timestamp"))?;

        let band = MusicBandDraft::try_from(frame)?.into_band()?;

        Ok(Record {
            id: id as u64,
            created_at,
            band,
        })
    }
}

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

fn coordinates_frame(coordinates: Coordinates) -> Frame {
    Frame::map()
        .with("x", Frame::Double(coordinates.x))
        .with("y", Frame::Double(coordinates.y))
}

fn studio_frame(studio: &Studio) -> Frame {
    Frame::map().with("address", Frame::bulk(studio.address.as_str()))
}

/// Null counts as absent.
fn field<'a>(frame: &'a Frame, key: &str) -> Option<&'a Frame> {
    frame.get(key).filter(|f| **f != Frame::Null)
}

fn string(frame: &Frame, name: &'static str) -> Result<String, ValidationError> {
    frame
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ValidationError::invalid(name, format!("must be a string, got {}", frame.kind())))
}

fn integer(frame: &Frame, name: &'static str) -> Result<i64, ValidationError> {
    match frame {
        Frame::Integer(i) => Ok(*i),
        frame => Err(ValidationError::invalid(
            name,
            format!("must be an integer, got {}", frame.kind()),
        )),
    }
}

fn number(frame: &Frame, name: &'static str) -> Result<f64, ValidationError> {
    match frame {
        Frame::Double(d) => Ok(*d),
        Frame::Integer(i) => Ok(*i as f64),
        frame => Err(ValidationError::invalid(
            name,
            format!("must be a number, got {}", frame.kind()),
        )),
    }
}

fn date(frame: &Frame, name: &'static str) -> Result<NaiveDate, ValidationError> {
    let s = string(frame, name)?;
    NaiveDate::from_str(&s)
        .map_err(|_| ValidationError::invalid(name, format!("must be a YYYY-MM-DD date, got {:?}", s)))
}

fn genre(frame: &Frame) -> Result<MusicGenre, ValidationError> {
    let s = string(frame, "genre")?;
    MusicGenre::from_str(&s).map_err(|_| {
        ValidationError::invalid(
            "genre",
            format!("must be one of {}, got {:?}", genres(), s),
        )
    })
}

fn coordinates(frame: &Frame) -> Result<Coordinates, ValidationError> {
    let x = field(frame, "x").ok_or(ValidationError::Missing("coordinates.x"))?;
    let y = field(frame, "y").ok_or(ValidationError::Missing("coordinates.y"))?;

    Ok(Coordinates {
        x: number(x, "coordinates.x")?,
        y: number(y, "coordinates.y")?,
    })
}

fn studio(frame: &Frame) -> Result<Studio, ValidationError> {
    let address = field(frame, "address").ok_or(ValidationError::Missing("studio.address"))?;

    Ok(Studio {
        address: string(address, "studio.address")?,
    })
}

/// Comma separated list of the accepted genre names.
pub fn genres() -> String {
    use strum::VariantNames;

    MusicGenre::VARIANTS.join(", ")
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let band = &self.band;
        writeln!(f, "#{} {}", self.id, band.name)?;
        writeln!(f, "   coordinates: {}", band.coordinates)?;
        if let Some(participants) = band.participants {
            writeln!(f, "   participants: {}", participants)?;
        }
        if let Some(established) = band.established {
            writeln!(f, "   established: {}", established)?;
        }
        if let Some(genre) = band.genre {
            writeln!(f, "   genre: {}", genre)?;
        }
        writeln!(f, "   studio: {}", band.studio.address)?;
        write!(f, "   created at: {}", format_timestamp(&self.created_at))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn band(name: &str) -> MusicBand {
        MusicBand {
            name: name.to_string(),
            coordinates: Coordinates { x: 1.5, y: -2.0 },
            participants: Some(4),
            established: NaiveDate::from_ymd_opt(1965, 1, 1),
            genre: Some(MusicGenre::PsychedelicRock),
            studio: Studio {
                address: "Abbey Road".to_string(),
            },
        }
    }

    #[test]
    fn valid_band_passes() {
        assert_eq!(band("Pink Floyd").validate(), Ok(()));
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = band("   ").validate().unwrap_err();
        assert!(matches!(err, ValidationError::Invalid { field: "name", .. }));
    }

    #[test]
    fn x_lower_bound_is_inclusive() {
        let mut b = band("Low");
        b.coordinates.x = MIN_X;
        assert_eq!(b.validate(), Ok(()));

        b.coordinates.x = MIN_X - 0.5;
        assert!(b.validate().is_err());

        b.coordinates.x = f64::NAN;
        assert!(b.validate().is_err());
    }

    #[test]
    fn participants_must_be_positive() {
        let mut b = band("Nobody");
        b.participants = Some(0);
        assert!(matches!(
            b.validate(),
            Err(ValidationError::Invalid {
                field: "participants",
                ..
            })
        ));

        b.participants = None;
        assert_eq!(b.validate(), Ok(()));
    }

    #[test]
    fn draft_missing_required_field() {
        let mut draft = MusicBandDraft::from(&band("Muse"));
        draft.studio = None;

        assert_eq!(draft.into_band(), Err(ValidationError::Missing("studio")));
    }

    #[test]
    fn draft_overlay_keeps_absent_fields() {
        let existing = band("Muse");
        let draft = MusicBandDraft {
            name: Some("Muse (live)".into()),
            participants: Some(3),
            ..Default::default()
        };

        let merged = draft.apply_to(&existing).unwrap();

        assert_eq!(merged.name, "Muse (live)");
        assert_eq!(merged.participants, Some(3));
        assert_eq!(merged.studio, existing.studio);
        assert_eq!(merged.genre, existing.genre);
    }

    #[test]
    fn draft_overlay_is_validated() {
        let draft = MusicBandDraft {
            participants: Some(-1),
            ..Default::default()
        };

        assert!(draft.apply_to(&band("Muse")).is_err());
    }

    #[test]
    fn record_frame_round_trip() {
        let record = Record {
            id: 12,
            created_at: Utc::now(),
            band: MusicBand {
                established: None,
                genre: None,
                ..band("Can")
            },
        };

        let frame = Frame::from(&record);

        assert_eq!(Record::try_from(&frame), Ok(record));
    }

    #[test]
    fn draft_accepts_integer_coordinates_and_ignores_unknown_keys() {
        let frame = Frame::map()
            .with("name", "Boards of Canada".into())
            .with(
                "coordinates",
                Frame::map()
                    .with("x", Frame::Integer(3))
                    .with("y", Frame::Double(0.5)),
            )
            .with("genre", "post_rock".into())
            .with("studio", Frame::map().with("address", "Pentland Hills".into()))
            .with("mood", "hazy".into());

        let draft = MusicBandDraft::try_from(&frame).unwrap();

        assert_eq!(draft.coordinates, Some(Coordinates { x: 3.0, y: 0.5 }));
        assert_eq!(draft.genre, Some(MusicGenre::PostRock));
        assert!(draft.into_band().is_ok());
    }

    #[test]
    fn draft_rejects_wrong_types() {
        let frame = Frame::map().with("participants", "four".into());

        assert!(matches!(
            MusicBandDraft::try_from(&frame),
            Err(ValidationError::Invalid {
                field: "participants",
                ..
            })
        ));
    }

    #[test]
    fn unknown_genre_is_rejected() {
        let frame = Frame::map().with("genre", "polka".into());

        assert!(MusicBandDraft::try_from(&frame).is_err());
    }

    #[test]
    fn genre_list_uses_wire_names() {
        assert_eq!(genres(), "PSYCHEDELIC_ROCK, RAP, POP, POST_ROCK, PUNK_ROCK");
    }
}
