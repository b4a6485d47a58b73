use crate::commands::executable::{Context, Executable};
use crate::commands::{CommandError, CommandParser, CommandParserError, Reply};
use crate::frame::Frame;

#[derive(Debug, PartialEq)]
pub struct Clear;

impl Executable for Clear {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        let removed = ctx.write()?.clear();

        Ok(Reply::new(format!("removed {} bands", removed)).with_payload(Frame::Integer(removed as i64)))
    }
}

impl TryFrom<&mut CommandParser> for Clear {
    type Error = CommandParserError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{dispatch, seed};
    use crate::store::Store;

    #[test]
    fn returns_the_number_of_removed_bands() {
        let store = Store::new();
        seed(&store, &["Can", "Neu!"]);

        let first = dispatch(&store, "clear", vec![]);
        let second = dispatch(&store, "clear", vec![]);

        assert_eq!(first.payload, Some(Frame::Integer(2)));
        assert_eq!(second.payload, Some(Frame::Integer(0)));
        assert!(store.read().is_empty());
    }
}
