use crate::commands::executable::{Context, Executable};
use crate::commands::{CommandError, CommandParser, CommandParserError, Reply};
use crate::frame::Frame;
use crate::model::format_timestamp;

const COLLECTION_TYPE: &str = "ordered list of music bands";

#[derive(Debug, PartialEq)]
pub struct Info;

impl Executable for Info {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        let store = ctx.read();

        let info = Frame::map()
            .with("type", Frame::bulk(COLLECTION_TYPE))
            .with("size", Frame::Integer(store.len() as i64))
            .with(
                "initialized_at",
                Frame::bulk(format_timestamp(&store.initialized_at())),
            )
            .with(
                "last_saved_at",
                Frame::from(store.last_saved_at().map(|t| format_timestamp(&t))),
            )
            .with("unsaved_changes", Frame::Boolean(store.is_dirty()))
            .with(
                "data_file",
                Frame::from(ctx.data_file().map(|path| path.display().to_string())),
            );

        Ok(Reply::new(format!("{}, {} bands", COLLECTION_TYPE, store.len())).with_payload(info))
    }
}

impl TryFrom<&mut CommandParser> for Info {
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
    fn describes_the_collection() {
        let store = Store::new();
        seed(&store, &["Can", "Neu!"]);

        let res = dispatch(&store, "info", vec![]);
        let info = res.payload.unwrap();

        assert_eq!(info.get("size"), Some(&Frame::Integer(2)));
        assert_eq!(info.get("last_saved_at"), Some(&Frame::Null));
        assert_eq!(info.get("unsaved_changes"), Some(&Frame::Boolean(true)));
        assert!(matches!(info.get("initialized_at"), Some(Frame::Bulk(_))));
    }
}
