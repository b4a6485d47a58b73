use crate::commands::executable::{Context, Executable};
use crate::commands::{CommandError, CommandParser, CommandParserError, Reply};
use crate::frame::Frame;

/// Lists every registered command with its usage.
#[derive(Debug, PartialEq)]
pub struct Help;

impl Executable for Help {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        let mut lines = Vec::new();
        let mut commands = Vec::new();

        for (name, handler) in ctx.registry().handlers() {
            lines.push(match handler.usage {
                "" => format!("{}: {}", name, handler.summary),
                usage => format!("{} {}: {}", name, usage, handler.summary),
            });
            commands.push(
                Frame::map()
                    .with("name", Frame::bulk(name))
                    .with("usage", Frame::bulk(handler.usage))
                    .with("summary", Frame::bulk(handler.summary))
                    .with("access", Frame::Simple(handler.access.to_string())),
            );
        }

        Ok(Reply::new(lines.join("\n")).with_payload(Frame::Array(commands)))
    }
}

impl TryFrom<&mut CommandParser> for Help {
    type Error = CommandParserError;

    fn try_from(_parser: &mut CommandParser) -> Result<Self, Self::Error> {
        Ok(Self)
    }
}
