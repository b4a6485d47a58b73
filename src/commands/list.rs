use crate::commands::executable::{Context, Executable};
use crate::commands::{CommandError, CommandParser, CommandParserError, Reply};
use crate::frame::Frame;

#[derive(Debug, PartialEq)]
pub struct List;

impl Executable for List {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        let store = ctx.read();
        let records: Vec<Frame> = store.iter().map(Frame::from).collect();

        Ok(Reply::new(format!("{} bands", records.len())).with_payload(Frame::Array(records)))
    }
}

impl TryFrom<&mut CommandParser> for List {
    type Error = CommandParserError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
