use crate::commands::executable::{Context, Executable};
use crate::commands::{CommandError, CommandParser, CommandParserError, Reply};
use crate::frame::Frame;

#[derive(Debug, PartialEq)]
pub struct RemoveById {
    pub id: u64,
}

impl Executable for RemoveById {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        let record = ctx
            .write()?
            .delete(self.id)
            .ok_or_else(|| CommandError::not_found(self.id))?;

        Ok(Reply::new(format!("removed band #{}", record.id)).with_payload(Frame::from(&record)))
    }
}

impl TryFrom<&mut CommandParser> for RemoveById {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let id = parser.next_id()?;
        Ok(Self { id })
    }
}
