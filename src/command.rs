// src/command.rs
//
// Console command parser. Each line typed by the user maps to one command.

use crate::composer::Radix;

/// Help text for the `help` command
pub const HELP: &str = "\
Connection:
  ports | refresh           list channels for the current CAN type
  port <name>               select channel
  bitrate <text>            set bitrate (10k 20k 50k 100k 125k 250k 500k 800k 1000k, 1M, 250000)
  connect | disconnect      open or close the channel
  status                    show connection and editor state
Message:
  id <text>                 set identifier
  data <b0> .. <b7>         set payload fields (- leaves a field empty)
  byte <n> <text>           set payload field n (0-7)
  ext | std                 extended or standard identifier
  hex | dec | radix         set or toggle radix
Sending:
  interval [ms]             set repeat interval (none or 0 = single send)
  send                      send once, or start/stop repeating
  stop                      stop repeating
Filter:
  filter add [id] [memo]    append a row
  filter set <row> <id>     set ignore id
  filter memo <row> <text>  set memo
  filter on|off <row>       enable or disable a row
  filter clear              reset to 6 empty rows
  filter list               show rows
Other:
  clear                     clear the log
  help                      this text
  quit                      exit";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command '{0}'. Type 'help' for a list.")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid row or field number '{0}'")]
    BadIndex(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterCommand {
    Add { id: String, memo: String },
    Set { row: usize, id: String },
    Memo { row: usize, memo: String },
    Enable { row: usize, enabled: bool },
    Clear,
    List,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ports,
    Port(String),
    Bitrate(String),
    Connect,
    Disconnect,
    Id(String),
    Data(Vec<String>),
    Byte { index: usize, text: String },
    Extended(bool),
    Radix(Radix),
    ToggleRadix,
    Interval(String),
    Send,
    Stop,
    Filter(FilterCommand),
    Clear,
    Status,
    Help,
    Quit,
}

fn parse_index(text: &str) -> Result<usize, CommandError> {
    text.parse()
        .map_err(|_| CommandError::BadIndex(text.to_string()))
}

/// Text after the first `n` words, with its inner spacing kept
fn rest_after(line: &str, n: usize) -> String {
    let mut rest = line.trim_start();
    for _ in 0..n {
        rest = rest
            .find(char::is_whitespace)
            .map(|i| rest[i..].trim_start())
            .unwrap_or("");
    }
    rest.trim_end().to_string()
}

fn parse_filter(line: &str, args: &[&str]) -> Result<FilterCommand, CommandError> {
    match args {
        ["add"] => Ok(FilterCommand::Add {
            id: String::new(),
            memo: String::new(),
        }),
        ["add", id, ..] => Ok(FilterCommand::Add {
            id: id.to_string(),
            memo: rest_after(line, 3),
        }),
        ["set", row, id] => Ok(FilterCommand::Set {
            row: parse_index(row)?,
            id: id.to_string(),
        }),
        ["set", row] => Ok(FilterCommand::Set {
            row: parse_index(row)?,
            id: String::new(),
        }),
        ["memo", row, ..] => Ok(FilterCommand::Memo {
            row: parse_index(row)?,
            memo: rest_after(line, 3),
        }),
        ["on", row] => Ok(FilterCommand::Enable {
            row: parse_index(row)?,
            enabled: true,
        }),
        ["off", row] => Ok(FilterCommand::Enable {
            row: parse_index(row)?,
            enabled: false,
        }),
        ["clear"] => Ok(FilterCommand::Clear),
        ["list"] | [] => Ok(FilterCommand::List),
        _ => Err(CommandError::Usage(
            "filter add [id] [memo] | set <row> <id> | memo <row> <text> | on|off <row> | clear | list",
        )),
    }
}

/// Parse one input line. Returns `Ok(None)` for blank lines.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&name, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = match (name.to_ascii_lowercase().as_str(), args) {
        ("ports" | "refresh", []) => Command::Ports,
        ("port", [name]) => Command::Port(name.to_string()),
        ("port", _) => return Err(CommandError::Usage("port <name>")),
        ("bitrate", [text]) => Command::Bitrate(text.to_string()),
        ("bitrate", _) => return Err(CommandError::Usage("bitrate <text>")),
        ("connect", []) => Command::Connect,
        ("disconnect", []) => Command::Disconnect,
        ("id", [text]) => Command::Id(text.to_string()),
        ("id", []) => Command::Id(String::new()),
        ("data", fields) if fields.len() <= 8 => Command::Data(
            fields
                .iter()
                .map(|f| if *f == "-" { String::new() } else { f.to_string() })
                .collect(),
        ),
        ("data", _) => return Err(CommandError::Usage("data <b0> .. <b7>")),
        ("byte", [index, text]) => Command::Byte {
            index: parse_index(index)?,
            text: if *text == "-" { String::new() } else { text.to_string() },
        },
        ("byte", _) => return Err(CommandError::Usage("byte <n> <text>")),
        ("ext", []) => Command::Extended(true),
        ("std", []) => Command::Extended(false),
        ("hex", []) => Command::Radix(Radix::Hex),
        ("dec", []) => Command::Radix(Radix::Decimal),
        ("radix", []) => Command::ToggleRadix,
        ("interval", []) => Command::Interval(String::new()),
        ("interval", [ms]) => Command::Interval(ms.to_string()),
        ("send", []) => Command::Send,
        ("stop", []) => Command::Stop,
        ("filter", rest) => Command::Filter(parse_filter(line, rest)?),
        ("clear", []) => Command::Clear,
        ("status", []) => Command::Status,
        ("help" | "?", _) => Command::Help,
        ("quit" | "exit", []) => Command::Quit,
        _ => return Err(CommandError::Unknown(line.trim().to_string())),
    };

    Ok(Some(command))
}
