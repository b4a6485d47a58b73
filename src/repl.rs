use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::client::{ClientError, Session, SessionState};
use crate::frame::Frame;
use crate::input;
use crate::message::Response;
use crate::model::Record;

/// Number of commands `history` shows.
pub const HISTORY_LEN: usize = 10;

const LOCAL_HELP: &str = "execute-script <file>: run the commands in <file>, one per line
exit: leave the client
history: the last 10 commands";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

enum Pending {
    Line(String),
    /// Marks the end of a script's lines.
    EndOfScript(PathBuf),
}

/// The interactive front end: local commands, scripts, and rendering of server responses.
pub struct Repl {
    session: Session,
    history: VecDeque<String>,
    // Scripts currently running, to refuse one that would run itself again.
    scripts: Vec<PathBuf>,
}

impl Repl {
    pub fn new(session: Session) -> Repl {
        Repl {
            session,
            history: VecDeque::with_capacity(HISTORY_LEN),
            scripts: Vec::new(),
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    pub async fn handle_line<W: Write>(&mut self, line: &str, out: &mut W) -> io::Result<Flow> {
        self.run(vec![Pending::Line(line.to_string())], out).await
    }

    pub async fn run_script<W: Write>(&mut self, path: &Path, out: &mut W) -> io::Result<Flow> {
        let mut pending = Vec::new();
        self.enter_script(path, &mut pending, out)?;
        self.run(pending, out).await
    }

    // Scripts are expanded onto an explicit stack instead of recursing.
    async fn run<W: Write>(&mut self, mut pending: Vec<Pending>, out: &mut W) -> io::Result<Flow> {
        let flow = self.drain(&mut pending, out).await;
        self.scripts.clear();
        flow
    }

    async fn drain<W: Write>(&mut self, pending: &mut Vec<Pending>, out: &mut W) -> io::Result<Flow> {
        while let Some(item) = pending.pop() {
            let line = match item {
                Pending::Line(line) => line,
                Pending::EndOfScript(path) => {
                    self.scripts.retain(|running| *running != path);
                    continue;
                }
            };

            let parsed = match input::parse_line(&line) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => continue,
                Err(e) => {
                    writeln!(out, "error: {}", e)?;
                    continue;
                }
            };
            self.remember(&parsed.command);

            match parsed.command.to_lowercase().replace('_', "-").as_str() {
                "exit" => return Ok(Flow::Exit),
                "history" => {
                    for (i, command) in self.history.iter().enumerate() {
                        writeln!(out, "{:>2}. {}", i + 1, command)?;
                    }
                }
                "execute-script" => {
                    match parsed.args.first().and_then(Frame::as_str) {
                        Some(path) if parsed.args.len() == 1 => {
                            self.enter_script(Path::new(path), pending, out)?
                        }
                        _ => writeln!(out, "error: usage: execute-script <file>")?,
                    }
                }
                "help" => {
                    if let Flow::Exit = self.send("help", parsed.args, out).await? {
                        return Ok(Flow::Exit);
                    }
                }
                _ => {
                    if let Flow::Exit = self.send(&parsed.command, parsed.args, out).await? {
                        return Ok(Flow::Exit);
                    }
                }
            }
        }

        Ok(Flow::Continue)
    }

    fn enter_script<W: Write>(
        &mut self,
        path: &Path,
        pending: &mut Vec<Pending>,
        out: &mut W,
    ) -> io::Result<()> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                writeln!(out, "error: can't read {}: {}", path.display(), e)?;
                return Ok(());
            }
        };
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        if self.scripts.contains(&path) {
            writeln!(
                out,
                "error: {} is already running, skipping it",
                path.display()
            )?;
            return Ok(());
        }

        debug!("Running script {}", path.display());
        self.scripts.push(path.clone());
        pending.push(Pending::EndOfScript(path));
        pending.extend(
            contents
                .lines()
                .rev()
                .map(|line| Pending::Line(line.to_string())),
        );

        Ok(())
    }

    async fn send<W: Write>(&mut self, command: &str, args: Vec<Frame>, out: &mut W) -> io::Result<Flow> {
        match self.session.execute(command, args).await {
            // The listing is already in the message, the payload is for programs.
            Ok(response) if command == "help" && response.is_ok() => {
                writeln!(out, "{}\n{}", response.message, LOCAL_HELP)?
            }
            Ok(response) => writeln!(out, "{}", render(&response))?,
            Err(ClientError::Timeout(timeout)) => writeln!(
                out,
                "error: no response within {} ms, the command may or may not have been applied",
                timeout.as_millis()
            )?,
            Err(e) => writeln!(out, "error: {}", e)?,
        }

        if self.session.state() == SessionState::Closed {
            writeln!(out, "connection to the server is lost")?;
            return Ok(Flow::Exit);
        }
        Ok(Flow::Continue)
    }

    fn remember(&mut self, command: &str) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(command.to_string());
    }
}

/// Human readable form of a response.
pub fn render(response: &Response) -> String {
    let mut out = String::new();

    if !response.is_ok() {
        let _ = write!(out, "error [{}]: {}", response.status, response.message);
        return out;
    }

    out.push_str(&response.message);
    match &response.payload {
        None | Some(Frame::Integer(_)) => {}
        Some(Frame::Array(items)) => {
            for item in items {
                match Record::try_from(item) {
                    Ok(record) => {
                        let _ = write!(out, "\n{}", record);
                    }
                    Err(_) => render_frame(&mut out, item, 1, "- "),
                }
            }
        }
        Some(frame @ Frame::Map(_)) => match Record::try_from(frame) {
            Ok(record) => {
                let _ = write!(out, "\n{}", record);
            }
            Err(_) => render_frame(&mut out, frame, 0, ""),
        },
        Some(frame) => render_frame(&mut out, frame, 1, ""),
    }

    out
}

fn render_frame(out: &mut String, frame: &Frame, depth: usize, prefix: &str) {
    let indent = "  ".repeat(depth);
    match frame {
        Frame::Map(entries) => {
            if !prefix.is_empty() {
                let _ = write!(out, "\n{}{}", indent, prefix.trim_end());
            }
            for (key, value) in entries {
                match value {
                    Frame::Map(_) | Frame::Array(_) => {
                        let _ = write!(out, "\n{}  {}:", indent, key);
                        render_frame(out, value, depth + 2, "");
                    }
                    value => {
                        let _ = write!(out, "\n{}  {}: {}", indent, key, scalar(value));
                    }
                }
            }
        }
        Frame::Array(items) => {
            for item in items {
                render_frame(out, item, depth, "- ");
            }
        }
        value => {
            let _ = write!(out, "\n{}{}{}", indent, prefix, scalar(value));
        }
    }
}

fn scalar(frame: &Frame) -> String {
    match frame {
        Frame::Null => "-".to_string(),
        Frame::Integer(i) => i.to_string(),
        Frame::Double(d) => d.to_string(),
        Frame::Boolean(b) => if *b { "yes" } else { "no" }.to_string(),
        frame => frame
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| frame.to_string()),
    }
}
