use itertools::Itertools;

use crate::commands::executable::{Context, Executable};
use crate::commands::{CommandError, CommandParser, CommandParserError, Reply};
use crate::frame::Frame;

/// Establishment dates from latest to earliest. Bands without a date are left out.
#[derive(Debug, PartialEq)]
pub struct DescendingEstablished;

impl Executable for DescendingEstablished {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        let dates: Vec<Frame> = ctx
            .read()
            .iter()
            .filter_map(|record| record.band.established)
            .sorted_by(|a, b| b.cmp(a))
            .map(|date| Frame::bulk(date.to_string()))
            .collect();

        Ok(Reply::new(format!("{} dates", dates.len())).with_payload(Frame::Array(dates)))
    }
}

impl TryFrom<&mut CommandParser> for DescendingEstablished {
    type Error = CommandParserError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
