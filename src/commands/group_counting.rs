use itertools::Itertools;

use crate::commands::executable::{Context, Executable};
use crate::commands::{CommandError, CommandParser, CommandParserError, Reply};
use crate::frame::Frame;

/// Key used for bands without an establishment date.
const NO_DATE: &str = "none";

/// Number of bands per establishment date, earliest date first and `none` last.
#[derive(Debug, PartialEq)]
pub struct GroupCountingByEstablished;

impl Executable for GroupCountingByEstablished {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        let counts = ctx
            .read()
            .iter()
            .map(|record| record.band.established)
            .counts();

        let message = format!("{} groups", counts.len());

        let mut groups = Frame::map();
        for (date, count) in counts
            .into_iter()
            .sorted_by_key(|(date, _)| (date.is_none(), *date))
        {
            let key = date.map_or_else(|| NO_DATE.to_string(), |date| date.to_string());
            groups.insert(&key, Frame::Integer(count as i64));
        }

        Ok(Reply::new(message).with_payload(groups))
    }
}

impl TryFrom<&mut CommandParser> for GroupCountingByEstablished {
    type Error = CommandParserError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
