use crate::commands::executable::{Context, Executable};
use crate::commands::{CommandError, CommandParser, CommandParserError, Reply};
use crate::frame::Frame;
use crate::model::MusicBand;

/// Creates a record under a fresh id. An `id` key in the band is ignored like any other unknown
/// field.
#[derive(Debug, PartialEq)]
pub struct Add {
    pub band: MusicBand,
}

impl Executable for Add {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        let mut store = ctx.write()?;
        let record = store.put(None, self.band);

        Ok(Reply::new(format!("added band #{}", record.id)).with_payload(Frame::from(record)))
    }
}

impl TryFrom<&mut CommandParser> for Add {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let band = parser.next_draft()?.into_band()?;
        Ok(Self { band })
    }
}
