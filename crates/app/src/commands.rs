use std::num::ParseIntError;
use std::path::PathBuf;

use chatline_backend::{ContactKind, FeedbackKind};
use snafu::{OptionExt, ResultExt, Snafu, ensure};

pub const HELP: &str = "\
commands:
  <text>                      send a message with any staged files
  /attach <path>              stage a file
  /capture <path>             stage an image from a capture file
  /dictate <recording>        transcribe a recording made until the next Enter
  /files                      list staged files
  /remove <n>                 unstage file number n
  /stop                       cancel the reply in progress
  /like <id>, /dislike <id>   rate a reply
  /contact <kind> <message>   send feedback, issue or suggestion
  /identify <email> [name]    set who you are
  /logout                     forget the identity
  /login                      print the login URL
  /history                    print the conversation
  /reload                     reload settings and start a new conversation
  /quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Attach(PathBuf),
    Capture(PathBuf),
    Dictate(PathBuf),
    Files,
    /// One-based, as printed by `/files`.
    Remove(usize),
    Stop,
    Rate { message_id: u64, kind: FeedbackKind },
    Contact { kind: ContactKind, message: String },
    Identify { email: String, name: String },
    Logout,
    Login,
    History,
    Reload,
    Help,
    Quit,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommandError {
    #[snafu(display("unknown command `/{name}`, try /help"))]
    UnknownCommand { stage: &'static str, name: String },
    #[snafu(display("`/{command}` needs {argument}"))]
    MissingArgument {
        stage: &'static str,
        command: &'static str,
        argument: &'static str,
    },
    #[snafu(display("`{raw}` is not a number: {source}"))]
    InvalidNumber {
        stage: &'static str,
        raw: String,
        source: ParseIntError,
    },
    #[snafu(display("`{raw}` is not one of feedback, issue, suggestion"))]
    UnknownContactKind { stage: &'static str, raw: String },
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Parses one input line. Anything not starting with `/` is a message.
pub fn parse(line: &str) -> CommandResult<Command> {
    let trimmed = line.trim();
    let Some(body) = trimmed.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };

    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };

    match name {
        "attach" => Ok(Command::Attach(path_argument(rest, "attach")?)),
        "capture" => Ok(Command::Capture(path_argument(rest, "capture")?)),
        "dictate" => Ok(Command::Dictate(path_argument(rest, "dictate")?)),
        "files" => Ok(Command::Files),
        "remove" => {
            let number = number_argument(rest, "remove", "a file number")?;
            Ok(Command::Remove(usize::try_from(number).unwrap_or(usize::MAX)))
        }
        "stop" => Ok(Command::Stop),
        "like" => Ok(Command::Rate {
            message_id: number_argument(rest, "like", "a message id")?,
            kind: FeedbackKind::Like,
        }),
        "dislike" => Ok(Command::Rate {
            message_id: number_argument(rest, "dislike", "a message id")?,
            kind: FeedbackKind::Dislike,
        }),
        "contact" => {
            let (raw_kind, message) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            ensure!(
                !raw_kind.is_empty(),
                MissingArgumentSnafu {
                    stage: "parse-command",
                    command: "contact",
                    argument: "a kind and a message",
                }
            );
            let kind = ContactKind::parse(raw_kind).context(UnknownContactKindSnafu {
                stage: "parse-command",
                raw: raw_kind,
            })?;
            Ok(Command::Contact {
                kind,
                message: message.trim().to_string(),
            })
        }
        "identify" => {
            let mut parts = rest.splitn(2, char::is_whitespace);
            let email = parts
                .next()
                .filter(|email| !email.is_empty())
                .context(MissingArgumentSnafu {
                    stage: "parse-command",
                    command: "identify",
                    argument: "an email",
                })?;
            Ok(Command::Identify {
                email: email.to_string(),
                name: parts.next().unwrap_or_default().trim().to_string(),
            })
        }
        "logout" => Ok(Command::Logout),
        "login" => Ok(Command::Login),
        "history" => Ok(Command::History),
        "reload" => Ok(Command::Reload),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => UnknownCommandSnafu {
            stage: "parse-command",
            name: other,
        }
        .fail(),
    }
}

fn path_argument(rest: &str, command: &'static str) -> CommandResult<PathBuf> {
    ensure!(
        !rest.is_empty(),
        MissingArgumentSnafu {
            stage: "parse-command",
            command,
            argument: "a path",
        }
    );
    Ok(PathBuf::from(rest))
}

fn number_argument(
    rest: &str,
    command: &'static str,
    argument: &'static str,
) -> CommandResult<u64> {
    ensure!(
        !rest.is_empty(),
        MissingArgumentSnafu {
            stage: "parse-command",
            command,
            argument,
        }
    );
    rest.parse::<u64>().context(InvalidNumberSnafu {
        stage: "parse-command",
        raw: rest,
    })
}
