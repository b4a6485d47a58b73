use crate::commands::executable::{Context, Executable};
use crate::commands::{CommandError, CommandParser, CommandParserError, Reply};

#[derive(Debug, PartialEq)]
pub struct Shuffle;

impl Executable for Shuffle {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        let mut store = ctx.write()?;
        store.shuffle();

        Ok(Reply::new(format!("shuffled {} bands", store.len())))
    }
}

impl TryFrom<&mut CommandParser> for Shuffle {
    type Error = CommandParserError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
