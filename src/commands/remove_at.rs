use crate::commands::executable::{Context, Executable};
use crate::commands::{CommandError, CommandParser, CommandParserError, Reply};
use crate::frame::Frame;

/// Removes the record at a 0-based position in collection order.
#[derive(Debug, PartialEq)]
pub struct RemoveAt {
    pub index: usize,
}

impl Executable for RemoveAt {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        let mut store = ctx.write()?;
        let len = store.len();

        let record = store.remove_at(self.index).ok_or_else(|| {
            CommandError::InvalidArgument(format!(
                "index {} is out of range, the collection holds {} bands",
                self.index, len
            ))
        })?;

        Ok(Reply::new(format!("removed band #{}", record.id)).with_payload(Frame::from(&record)))
    }
}

impl TryFrom<&mut CommandParser> for RemoveAt {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let index = parser.next_index()?;
        Ok(Self { index })
    }
}
