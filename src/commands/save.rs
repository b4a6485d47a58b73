use crate::commands::executable::{Context, Executable};
use crate::commands::{CommandError, CommandParser, CommandParserError, Reply};

/// Writes the collection to the configured data file right away.
#[derive(Debug, PartialEq)]
pub struct Save;

impl Executable for Save {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        let path = ctx
            .data_file()
            .ok_or_else(|| CommandError::Persistence("no data file configured".to_string()))?;

        // `Store::save` takes the lock itself and releases it before touching the disk.
        ctx.store().save(path)?;

        Ok(Reply::new(format!("saved to {}", path.display())))
    }
}

impl TryFrom<&mut CommandParser> for Save {
    type Error = CommandParserError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
