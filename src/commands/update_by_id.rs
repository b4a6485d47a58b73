use crate::commands::executable::{Context, Executable};
use crate::commands::{CommandError, CommandParser, CommandParserError, Reply};
use crate::frame::Frame;
use crate::model::MusicBandDraft;

/// Overrides the fields present in `draft` and keeps the rest. The record must already exist.
#[derive(Debug, PartialEq)]
pub struct UpdateById {
    pub id: u64,
    pub draft: MusicBandDraft,
}

impl Executable for UpdateById {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        let mut store = ctx.write()?;

        let current = store
            .get(self.id)
            .ok_or_else(|| CommandError::not_found(self.id))?;
        // Validated before anything is written.
        let band = self.draft.apply_to(&current.band)?;
        let record = store.put(Some(self.id), band);

        Ok(Reply::new(format!("updated band #{}", record.id)).with_payload(Frame::from(record)))
    }
}

impl TryFrom<&mut CommandParser> for UpdateById {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let id = parser.next_id()?;
        let draft = parser.next_draft()?;

        if draft.is_empty() {
            return Err(CommandParserError::InvalidArgument {
                argument: "band",
                reason: "no fields to update".to_string(),
            });
        }

        Ok(Self { id, draft })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{dispatch, seed};
    use crate::commands::{Command, Registry};
    use crate::message::Status;
    use crate::model::{Coordinates, MusicGenre};
    use crate::store::Store;

    #[test]
    fn parse_partial_band() {
        let frame = Frame::map().with("genre", "post_rock".into());

        let (cmd, _) = Registry::default()
            .parse("update-by-id", vec![Frame::Integer(4), frame])
            .unwrap();

        assert_eq!(
            cmd,
            Command::UpdateById(UpdateById {
                id: 4,
                draft: MusicBandDraft {
                    genre: Some(MusicGenre::PostRock),
                    ..Default::default()
                },
            })
        );
    }

    #[test]
    fn parse_rejects_empty_update() {
        let err = Registry::default()
            .parse("update-by-id", vec![Frame::Integer(4), Frame::map()])
            .err()
            .unwrap();

        assert!(matches!(
            err,
            CommandError::Usage {
                source: CommandParserError::InvalidArgument { argument: "band", .. },
                ..
            }
        ));
    }

    #[test]
    fn merges_fields_and_keeps_identity() {
        let store = Store::new();
        let seeded = seed(&store, &["Can", "Neu!"]);
        let frame = Frame::map()
            .with("name", "Can (1968)".into())
            .with("coordinates", Frame::map().with("x", 10.0.into()).with("y", 20.0.into()));

        let res = dispatch(&store, "update-by-id", vec![Frame::Integer(1), frame]);

        assert_eq!(res.status, Status::Ok);
        let state = store.read();
        let updated = state.get(1).unwrap();
        assert_eq!(updated.band.name, "Can (1968)");
        assert_eq!(updated.band.coordinates, Coordinates { x: 10.0, y: 20.0 });
        assert_eq!(updated.band.studio, seeded[0].band.studio);
        assert_eq!(updated.created_at, seeded[0].created_at);
        assert_eq!(state.iter().next().map(|r| r.id), Some(1));
    }

    #[test]
    fn unknown_id_is_not_inserted() {
        let store = Store::new();
        let frame = Frame::map().with("name", "Ghost".into());

        let res = dispatch(&store, "update-by-id", vec![Frame::Integer(3), frame]);

        assert_eq!(res.status, Status::InvalidArgument);
        assert!(store.read().is_empty());
    }

    #[test]
    fn invalid_merge_leaves_the_record_untouched() {
        let store = Store::new();
        let seeded = seed(&store, &["Can"]);
        let frame = Frame::map().with("coordinates", Frame::map().with("x", (-600.0).into()).with("y", 0.0.into()));

        let res = dispatch(&store, "update-by-id", vec![Frame::Integer(1), frame]);

        assert_eq!(res.status, Status::InvalidArgument);
        assert_eq!(store.read().get(1), Some(&seeded[0]));
    }
}
