pub mod add;
pub mod clear;
pub mod count;
pub mod descending_established;
pub mod executable;
pub mod filter;
pub mod group_counting;
pub mod help;
pub mod info;
pub mod list;
pub mod remove_at;
pub mod remove_by_id;
pub mod save;
pub mod shuffle;
pub mod update_by_id;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{str, vec};
use strum_macros::{AsRefStr, Display};
use thiserror::Error as ThisError;
use tracing::{debug, warn};

use crate::commands::executable::{Context, Executable};
use crate::frame::Frame;
use crate::message::{Request, Response, Status};
use crate::model::{MusicBandDraft, ValidationError};
use crate::store::{PersistenceError, Store};

use add::Add;
use clear::Clear;
use count::Count;
use descending_established::DescendingEstablished;
use filter::FilterByPredicate;
use group_counting::GroupCountingByEstablished;
use help::Help;
use info::Info;
use list::List;
use remove_at::RemoveAt;
use remove_by_id::RemoveById;
use save::Save;
use shuffle::Shuffle;
use update_by_id::UpdateById;

#[derive(Debug, PartialEq)]
pub enum Command {
    Add(Add),
    Clear(Clear),
    RemoveAt(RemoveAt),
    RemoveById(RemoveById),
    Save(Save),
    Shuffle(Shuffle),
    UpdateById(UpdateById),

    Count(Count),
    DescendingEstablished(DescendingEstablished),
    FilterByPredicate(FilterByPredicate),
    GroupCountingByEstablished(GroupCountingByEstablished),
    Help(Help),
    Info(Info),
    List(List),
}

impl Executable for Command {
    fn exec(self, ctx: &Context<'_>) -> Result<Reply, CommandError> {
        match self {
            Command::Add(cmd) => cmd.exec(ctx),
            Command::Clear(cmd) => cmd.exec(ctx),
            Command::Count(cmd) => cmd.exec(ctx),
            Command::DescendingEstablished(cmd) => cmd.exec(ctx),
            Command::FilterByPredicate(cmd) => cmd.exec(ctx),
            Command::GroupCountingByEstablished(cmd) => cmd.exec(ctx),
            Command::Help(cmd) => cmd.exec(ctx),
            Command::Info(cmd) => cmd.exec(ctx),
            Command::List(cmd) => cmd.exec(ctx),
            Command::RemoveAt(cmd) => cmd.exec(ctx),
            Command::RemoveById(cmd) => cmd.exec(ctx),
            Command::Save(cmd) => cmd.exec(ctx),
            Command::Shuffle(cmd) => cmd.exec(ctx),
            Command::UpdateById(cmd) => cmd.exec(ctx),
        }
    }
}

/// What a command hands back on success. The registry wraps it into a [`Response`].
#[derive(Debug, PartialEq)]
pub struct Reply {
    pub message: String,
    pub payload: Option<Frame>,
}

impl Reply {
    pub fn new(message: impl Into<String>) -> Reply {
        Reply {
            message: message.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Frame) -> Reply {
        self.payload = Some(payload);
        self
    }
}

/// Whether a handler may change the collection. Mutating handlers run under the exclusive side
/// of the store lock, read-only handlers under the shared side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Access {
    ReadOnly,
    Mutating,
}

pub type ParseFn = fn(&mut CommandParser) -> Result<Command, CommandParserError>;

#[derive(Clone, Copy)]
pub struct Handler {
    pub access: Access,
    /// Arguments as shown to users, e.g. `<id> <band>`.
    pub usage: &'static str,
    pub summary: &'static str,
    pub parse: ParseFn,
}

impl Handler {
    pub fn new(access: Access, usage: &'static str, summary: &'static str, parse: ParseFn) -> Handler {
        Handler {
            access,
            usage,
            summary,
            parse,
        }
    }
}

/// Name to handler table. Lookups are case-insensitive and accept `_` in place of `-`.
pub struct Registry {
    handlers: BTreeMap<String, Handler>,
    data_file: Option<PathBuf>,
}

impl Registry {
    /// An empty registry. Use [`Registry::default`] for the built-in command set.
    pub fn new() -> Registry {
        Registry {
            handlers: BTreeMap::new(),
            data_file: None,
        }
    }

    /// File used by the `save` command.
    pub fn with_data_file(mut self, path: impl Into<PathBuf>) -> Registry {
        self.data_file = Some(path.into());
        self
    }

    pub fn data_file(&self) -> Option<&Path> {
        self.data_file.as_deref()
    }

    /// Adds or replaces the handler for `name`.
    pub fn register(&mut self, name: &str, handler: Handler) {
        self.handlers.insert(normalize(name), handler);
    }

    pub fn get(&self, name: &str) -> Option<&Handler> {
        self.handlers.get(&normalize(name))
    }

    /// Handlers sorted by name.
    pub fn handlers(&self) -> impl Iterator<Item = (&str, &Handler)> {
        self.handlers.iter().map(|(name, handler)| (name.as_str(), handler))
    }

    /// Resolves `name` and parses `args` into a command without running it.
    pub fn parse(&self, name: &str, args: Vec<Frame>) -> Result<(Command, Access), CommandError> {
        let name = normalize(name);
        let handler = self
            .handlers
            .get(&name)
            .ok_or_else(|| CommandError::UnknownCommand(name.clone()))?;

        let parser = &mut CommandParser::new(args);
        let command = (handler.parse)(parser)
            .and_then(|command| parser.finish().map(|_| command))
            .map_err(|source| CommandError::Usage {
                source,
                usage: format!("{} {}", name, handler.usage).trim_end().to_string(),
            })?;

        Ok((command, handler.access))
    }

    /// Runs one request against `store`. Every failure ends up as an error response; nothing
    /// here closes the connection.
    pub fn dispatch(&self, request: Request, store: &Store) -> Response {
        let Request {
            token,
            command,
            args,
        } = request;

        let result = self.parse(&command, args).and_then(|(cmd, access)| {
            debug!("Executing {:?} ({})", cmd, access);
            let ctx = Context {
                store,
                registry: self,
                access,
            };
            cmd.exec(&ctx)
        });

        let response = match result {
            Ok(reply) => Response::ok(reply.message, reply.payload),
            Err(err) => {
                if err.status() == Status::InternalError {
                    warn!("Command {} failed: {}", command, err);
                } else {
                    debug!("Command {} rejected: {}", command, err);
                }
                Response::error(err.status(), err.to_string())
            }
        };

        response.with_token(token)
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Registry::new();

        registry.register(
            "add",
            Handler::new(
                Access::Mutating,
                "<band>",
                "add a new band to the collection",
                |parser| Add::try_from(parser).map(Command::Add),
            ),
        );
        registry.register(
            "remove-by-id",
            Handler::new(
                Access::Mutating,
                "<id>",
                "remove the band with the given id",
                |parser| RemoveById::try_from(parser).map(Command::RemoveById),
            ),
        );
        registry.register(
            "update-by-id",
            Handler::new(
                Access::Mutating,
                "<id> <band>",
                "change the given fields of the band with the given id",
                |parser| UpdateById::try_from(parser).map(Command::UpdateById),
            ),
        );
        registry.register(
            "remove-at",
            Handler::new(
                Access::Mutating,
                "<index>",
                "remove the band at the given position, counting from 0",
                |parser| RemoveAt::try_from(parser).map(Command::RemoveAt),
            ),
        );
        registry.register(
            "clear",
            Handler::new(
                Access::Mutating,
                "",
                "remove every band",
                |parser| Clear::try_from(parser).map(Command::Clear),
            ),
        );
        registry.register(
            "shuffle",
            Handler::new(
                Access::Mutating,
                "",
                "put the bands in random order",
                |parser| Shuffle::try_from(parser).map(Command::Shuffle),
            ),
        );
        registry.register(
            "save",
            Handler::new(
                Access::Mutating,
                "",
                "write the collection to the data file now",
                |parser| Save::try_from(parser).map(Command::Save),
            ),
        );
        registry.register(
            "list",
            Handler::new(
                Access::ReadOnly,
                "",
                "show every band in collection order",
                |parser| List::try_from(parser).map(Command::List),
            ),
        );
        registry.register(
            "count",
            Handler::new(
                Access::ReadOnly,
                "",
                "number of bands in the collection",
                |parser| Count::try_from(parser).map(Command::Count),
            ),
        );
        registry.register(
            "filter-by-predicate",
            Handler::new(
                Access::ReadOnly,
                "<field> <lt|le|eq|ne|ge|gt|match> <value>",
                "show the bands whose field satisfies the comparison",
                |parser| FilterByPredicate::try_from(parser).map(Command::FilterByPredicate),
            ),
        );
        registry.register(
            "group-counting-by-establishment-date",
            Handler::new(
                Access::ReadOnly,
                "",
                "number of bands per establishment date",
                |parser| {
                    GroupCountingByEstablished::try_from(parser)
                        .map(Command::GroupCountingByEstablished)
                },
            ),
        );
        registry.register(
            "print-field-descending-establishment-date",
            Handler::new(
                Access::ReadOnly,
                "",
                "establishment dates from latest to earliest",
                |parser| DescendingEstablished::try_from(parser).map(Command::DescendingEstablished),
            ),
        );
        registry.register(
            "info",
            Handler::new(
                Access::ReadOnly,
                "",
                "information about the collection",
                |parser| Info::try_from(parser).map(Command::Info),
            ),
        );
        registry.register(
            "help",
            Handler::new(
                Access::ReadOnly,
                "",
                "list the available commands",
                |parser| Help::try_from(parser).map(Command::Help),
            ),
        );

        registry
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace('_', "-")
}

/// Walks the arguments of a request from left to right.
pub struct CommandParser {
    parts: vec::IntoIter<Frame>,
}

impl CommandParser {
    pub fn new(args: Vec<Frame>) -> CommandParser {
        CommandParser {
            parts: args.into_iter(),
        }
    }

    fn next(&mut self) -> Result<Frame, CommandParserError> {
        self.parts.next().ok_or(CommandParserError::EndOfStream)
    }

    pub fn next_frame(&mut self) -> Result<Frame, CommandParserError> {
        self.next()
    }

    pub fn next_string(&mut self) -> Result<String, CommandParserError> {
        match self.next()? {
            // Both `Simple` and `Bulk` representation may be strings. Strings are parsed to UTF-8.
            Frame::Simple(s) => Ok(s),
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map(|s| s.to_string())
                .map_err(CommandParserError::InvalidUTF8String),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "simple or bulk string".to_string(),
                actual: frame,
            }),
        }
    }

    pub fn next_integer(&mut self) -> Result<i64, CommandParserError> {
        match self.next()? {
            Frame::Integer(i) => Ok(i),
            Frame::Simple(string) => {
                string
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| CommandParserError::InvalidFrame {
                        expected: "integer".to_string(),
                        actual: Frame::Simple(string),
                    })
            }
            Frame::Bulk(bytes) => str::from_utf8(&bytes[..])
                .map_err(CommandParserError::InvalidUTF8String)?
                .trim()
                .parse::<i64>()
                .map_err(|_| CommandParserError::InvalidFrame {
                    expected: "integer".to_string(),
                    actual: Frame::Bulk(bytes),
                }),
            frame => Err(CommandParserError::InvalidFrame {
                expected: "integer".to_string(),
                actual: frame,
            }),
        }
    }

    /// A record id, always positive.
    pub fn next_id(&mut self) -> Result<u64, CommandParserError> {
        let id = self.next_integer()?;
        if id <= 0 {
            return Err(CommandParserError::InvalidArgument {
                argument: "id",
                reason: format!("must be positive, got {}", id),
            });
        }
        Ok(id as u64)
    }

    pub fn next_index(&mut self) -> Result<usize, CommandParserError> {
        let index = self.next_integer()?;
        usize::try_from(index).map_err(|_| CommandParserError::InvalidArgument {
            argument: "index",
            reason: format!("must not be negative, got {}", index),
        })
    }

    pub fn next_draft(&mut self) -> Result<MusicBandDraft, CommandParserError> {
        let frame = self.next()?;
        Ok(MusicBandDraft::try_from(&frame)?)
    }

    /// Fails if arguments are left over.
    pub fn finish(&mut self) -> Result<(), CommandParserError> {
        match self.parts.len() {
            0 => Ok(()),
            count => Err(CommandParserError::TooManyArguments { count }),
        }
    }
}

#[derive(Debug, ThisError, PartialEq)]
pub enum CommandParserError {
    #[error("invalid argument, expected {expected}, got {actual}")]
    InvalidFrame { expected: String, actual: Frame },
    #[error("invalid argument `{argument}`: {reason}")]
    InvalidArgument {
        argument: &'static str,
        reason: String,
    },
    #[error("invalid UTF-8 string")]
    InvalidUTF8String(#[from] str::Utf8Error),
    #[error("missing argument")]
    EndOfStream,
    #[error("{count} unexpected extra argument(s)")]
    TooManyArguments { count: usize },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Reasons a request fails after it was decoded. Each maps onto a wire [`Status`].
#[derive(Debug, ThisError, PartialEq)]
pub enum CommandError {
    #[error("unknown command `{0}`, try `help`")]
    UnknownCommand(String),
    #[error("{source}; usage: {usage}")]
    Usage {
        source: CommandParserError,
        usage: String,
    },
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Persistence(String),
    #[error("{0}")]
    Internal(String),
}

impl CommandError {
    pub fn status(&self) -> Status {
        match self {
            CommandError::UnknownCommand(_) => Status::UnknownCommand,
            CommandError::Usage { .. } | CommandError::InvalidArgument(_) => {
                Status::InvalidArgument
            }
            CommandError::Persistence(_) => Status::PersistenceFailure,
            CommandError::Internal(_) => Status::InternalError,
        }
    }

    pub(crate) fn not_found(id: u64) -> CommandError {
        CommandError::InvalidArgument(format!("band #{} not found", id))
    }
}

impl From<ValidationError> for CommandError {
    fn from(err: ValidationError) -> Self {
        CommandError::InvalidArgument(err.to_string())
    }
}

impl From<PersistenceError> for CommandError {
    fn from(err: PersistenceError) -> Self {
        CommandError::Persistence(err.to_string())
    }
}
