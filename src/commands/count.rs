use crate::commands::executable::{Context, Executable};
use crate::commands::{CommandError, CommandParser, CommandParserError, Reply};
use crate::frame::Frame;

#[derive(Debug, PartialEq)]
pub struct Count;

impl Executable for Count {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        let count = ctx.read().len();

        Ok(Reply::new(format!("{} bands", count)).with_payload(Frame::Integer(count as i64)))
    }
}

impl TryFrom<&mut CommandParser> for Count {
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
    fn count() {
        let store = Store::new();
        assert_eq!(
            dispatch(&store, "count", vec![]).payload,
            Some(Frame::Integer(0))
        );

        seed(&store, &["Can", "Neu!"]);

        assert_eq!(
            dispatch(&store, "count", vec![]).payload,
            Some(Frame::Integer(2))
        );
        assert_eq!(
            dispatch(&store, "count", vec![]).payload,
            Some(Frame::Integer(2))
        );
    }
}
