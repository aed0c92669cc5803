use sticky_engine::{EmbedSpec, StickyContent};
use thiserror::Error;

pub const USAGE: &str = "\
Usage:
  !sticky set <text>
  !sticky embed <title> | <description> [| <color>] [| <footer>] [| <thumbnail url>] [| <image url>]
  !sticky remove
  !sticky show
  !sticky list
  !sticky reset
Colors: #rrggbb or blue, red, green, yellow, orange, purple, grey";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StickyCommand {
    Set(StickyContent),
    Remove,
    Show,
    /// Every room's sticky.
    List,
    Reset,
    Help,
}

impl StickyCommand {
    /// Whether the command changes sticky state (and so needs an admin).
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(self, Self::Set(_) | Self::Remove | Self::Reset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("`!sticky set` needs the message text")]
    MissingText,
    #[error("an embed needs a description: `!sticky embed <title> | <description>`")]
    MissingDescription,
    #[error("unknown color `{0}`")]
    InvalidColor(String),
    #[error("unknown subcommand `{0}`")]
    UnknownSubcommand(String),
}

/// Parses the text following `!sticky`.
pub fn parse(args: &str) -> Result<StickyCommand, CommandError> {
    let args = args.trim();
    let (sub, rest) = args
        .split_once(char::is_whitespace)
        .map_or((args, ""), |(sub, rest)| (sub, rest.trim()));

    match sub.to_lowercase().as_str() {
        "" | "help" => Ok(StickyCommand::Help),
        "set" => {
            if rest.is_empty() {
                Err(CommandError::MissingText)
            } else {
                Ok(StickyCommand::Set(StickyContent::text(rest)))
            }
        }
        "embed" => parse_embed(rest).map(|embed| StickyCommand::Set(StickyContent::Embed(embed))),
        "remove" | "delete" | "clear" => Ok(StickyCommand::Remove),
        "show" | "status" => Ok(StickyCommand::Show),
        "list" => Ok(StickyCommand::List),
        "reset" => Ok(StickyCommand::Reset),
        _ => Err(CommandError::UnknownSubcommand(sub.to_owned())),
    }
}

fn parse_embed(rest: &str) -> Result<EmbedSpec, CommandError> {
    let mut parts = rest.split('|').map(str::trim);
    let title = parts.next().unwrap_or_default();
    let description = parts.next().unwrap_or_default();
    if description.is_empty() {
        return Err(CommandError::MissingDescription);
    }
    let color = match parts.next().filter(|s| !s.is_empty()) {
        Some(raw) => parse_color(raw)?,
        None => EmbedSpec::DEFAULT_COLOR,
    };
    let mut optional = || parts.next().filter(|s| !s.is_empty()).map(ToOwned::to_owned);
    let footer = optional();
    let thumbnail = optional();
    let image = optional();

    Ok(EmbedSpec {
        title: if title.is_empty() {
            EmbedSpec::DEFAULT_TITLE.to_owned()
        } else {
            title.to_owned()
        },
        description: description.to_owned(),
        color,
        footer,
        thumbnail,
        image,
    })
}

/// `#rrggbb`, `rrggbb` or a named color.
pub fn parse_color(raw: &str) -> Result<u32, CommandError> {
    let named = match raw.to_lowercase().as_str() {
        "blue" => Some(0x0034_98db),
        "red" => Some(0x00e7_4c3c),
        "green" => Some(0x002e_cc71),
        "yellow" => Some(0x00f1_c40f),
        "orange" => Some(0x00e6_7e22),
        "purple" => Some(0x009b_59b6),
        "grey" | "gray" => Some(0x0095_a5a6),
        _ => None,
    };
    if let Some(color) = named {
        return Ok(color);
    }
    let hex = raw.strip_prefix('#').unwrap_or(raw);
    if hex.len() != 6 {
        return Err(CommandError::InvalidColor(raw.to_owned()));
    }
    u32::from_str_radix(hex, 16).map_err(|_| CommandError::InvalidColor(raw.to_owned()))
}
