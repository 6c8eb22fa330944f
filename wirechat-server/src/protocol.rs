//! Wire protocol: client commands and server frames.
//!
//! Every frame is one line of UTF-8 text. Client keywords are
//! case-sensitive; arguments are free-form. Server frames start with one of
//! `SYS`, `ERR`, `MSG`, `IMG` or are the bare `PONG`.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

/// Server version reported by `VERSION` and the banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Longest accepted nickname, in characters.
pub const MAX_NICK_LEN: usize = 20;

pub const PONG: &str = "PONG";
pub const PROMPT: &str = "SYS Send: NICK <name>";
pub const REPLAY_END: &str = "SYS Replay end";

/// Commands listed by `CMDS`/`HELP`.
pub const COMMAND_HELP: &[(&str, &str)] = &[
    ("ADMIN", "Authenticate as admin: ADMIN <token>"),
    ("CMDS", "Show available commands"),
    ("HELP", "An alias of CMDS"),
    ("IMG", "Share an image: IMG <url>"),
    ("KICK", "Kick a user (admin only): KICK <nickname>"),
    ("MSG", "Send a chat message: MSG <text>"),
    ("PING", "A simple PING PONG command"),
    ("QUIT", "Disconnect from the server"),
    ("STATS", "Get server stats"),
    ("UPTIME", "Get uptime"),
    ("VERSION", "Show the server version"),
    ("WHO", "List connected users"),
];

static IMAGE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://\S+$").expect("static regex"));

/// A parsed line from an active (registered) connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Msg(&'a str),
    Img(&'a str),
    Who,
    Version,
    Help,
    Ping,
    Uptime,
    Stats,
    Admin(&'a str),
    Kick(&'a str),
    Quit,
    /// `NICK` after the handshake; nicknames are immutable.
    Nick,
    Unknown,
}

impl<'a> Command<'a> {
    /// Parse a trimmed line.
    pub fn parse(line: &'a str) -> Self {
        let (keyword, rest) = match line.split_once(' ') {
            Some((k, r)) => (k, Some(r.trim())),
            None => (line, None),
        };

        match (keyword, rest) {
            ("WHO", None) => Self::Who,
            ("VERSION", None) => Self::Version,
            ("CMDS" | "HELP", None) => Self::Help,
            ("PING", None) => Self::Ping,
            ("UPTIME", None) => Self::Uptime,
            ("STATS", None) => Self::Stats,
            ("QUIT", None) => Self::Quit,
            ("MSG", Some(text)) => Self::Msg(text),
            ("IMG", rest) => Self::Img(rest.unwrap_or("")),
            ("ADMIN", rest) => Self::Admin(rest.unwrap_or("")),
            ("KICK", rest) => Self::Kick(rest.unwrap_or("")),
            ("NICK", _) => Self::Nick,
            _ => Self::Unknown,
        }
    }
}

/// Extract the name from a handshake line, or `None` if the line is not
/// of the form `NICK <name>`.
pub fn parse_nick(line: &str) -> Option<&str> {
    line.trim_end_matches(['\r', '\n'])
        .strip_prefix("NICK ")
        .map(str::trim)
}

/// 1 to 20 printable characters, no whitespace.
pub fn valid_nickname(nick: &str) -> bool {
    let len = nick.chars().count();
    (1..=MAX_NICK_LEN).contains(&len) && nick.chars().all(is_printable)
}

/// Excludes controls (Cc), separators (Z*), format characters (Cf) and
/// private use (Co).
fn is_printable(c: char) -> bool {
    !c.is_control() && !c.is_whitespace() && !is_format(c) && !is_private_use(c)
}

/// General category Cf: soft hyphen, bidi controls, zero-width and other
/// invisible characters.
fn is_format(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{0600}'..='\u{0605}'
            | '\u{061C}'
            | '\u{06DD}'
            | '\u{070F}'
            | '\u{0890}'..='\u{0891}'
            | '\u{08E2}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206F}'
            | '\u{FEFF}'
            | '\u{FFF9}'..='\u{FFFB}'
            | '\u{110BD}'
            | '\u{110CD}'
            | '\u{13430}'..='\u{1343F}'
            | '\u{1BCA0}'..='\u{1BCA3}'
            | '\u{1D173}'..='\u{1D17A}'
            | '\u{E0001}'
            | '\u{E0020}'..='\u{E007F}'
    )
}

fn is_private_use(c: char) -> bool {
    matches!(
        c,
        '\u{E000}'..='\u{F8FF}' | '\u{F0000}'..='\u{FFFFD}' | '\u{100000}'..='\u{10FFFD}'
    )
}

pub fn valid_image_url(url: &str) -> bool {
    IMAGE_URL.is_match(url)
}

pub fn sys(text: impl AsRef<str>) -> String {
    format!("SYS {}", text.as_ref())
}

pub fn err(text: impl AsRef<str>) -> String {
    format!("ERR {}", text.as_ref())
}

pub fn banner() -> String {
    sys(format!("Welcome to Wirechat v{VERSION}"))
}

pub fn replay_start(count: usize) -> String {
    sys(format!("Replay start ({count} messages)"))
}

/// `SYS Available commands: | /admin - ... | ...`
pub fn help_text() -> String {
    let mut lines = vec!["Available commands:".to_string()];
    let mut entries = COMMAND_HELP.to_vec();
    entries.sort_by_key(|(name, _)| *name);
    for (name, desc) in entries {
        lines.push(format!("/{} - {desc}", name.to_lowercase()));
    }
    sys(lines.join(" | "))
}

/// Compact human uptime: `2d 3h 4m`, `3h 4m`, `4m 5s`, `5s`.
pub fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (mins, sec) = (secs / 60, secs % 60);
    let (hrs, mins) = (mins / 60, mins % 60);
    let (days, hrs) = (hrs / 24, hrs % 24);

    if days > 0 {
        format!("{days}d {hrs}h {mins}m")
    } else if hrs > 0 {
        format!("{hrs}h {mins}m")
    } else if mins > 0 {
        format!("{mins}m {sec}s")
    } else {
        format!("{sec}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_keywords() {
        assert_eq!(Command::parse("WHO"), Command::Who);
        assert_eq!(Command::parse("HELP"), Command::Help);
        assert_eq!(Command::parse("CMDS"), Command::Help);
        assert_eq!(Command::parse("QUIT"), Command::Quit);
        assert_eq!(Command::parse("PING"), Command::Ping);
    }

    #[test]
    fn keywords_are_case_sensitive() {
        assert_eq!(Command::parse("who"), Command::Unknown);
        assert_eq!(Command::parse("msg hi"), Command::Unknown);
    }

    #[test]
    fn bare_keyword_with_trailing_argument_is_unknown() {
        assert_eq!(Command::parse("WHO me"), Command::Unknown);
    }

    #[test]
    fn parses_arguments() {
        assert_eq!(Command::parse("MSG hello  world"), Command::Msg("hello  world"));
        assert_eq!(Command::parse("IMG https://x.test/a.png"), Command::Img("https://x.test/a.png"));
        assert_eq!(Command::parse("ADMIN s3cret"), Command::Admin("s3cret"));
        assert_eq!(Command::parse("ADMIN"), Command::Admin(""));
        assert_eq!(Command::parse("KICK alice"), Command::Kick("alice"));
        assert_eq!(Command::parse("NICK bob"), Command::Nick);
    }

    #[test]
    fn msg_without_text_is_unknown() {
        assert_eq!(Command::parse("MSG"), Command::Unknown);
        assert_eq!(Command::parse("hello there"), Command::Unknown);
    }

    #[test]
    fn handshake_line() {
        assert_eq!(parse_nick("NICK alice"), Some("alice"));
        assert_eq!(parse_nick("NICK  alice \r\n"), Some("alice"));
        assert_eq!(parse_nick("NICK "), Some(""));
        assert_eq!(parse_nick("NICKalice"), None);
        assert_eq!(parse_nick("MSG hi"), None);
    }

    #[test]
    fn nickname_rules() {
        assert!(valid_nickname("alice"));
        assert!(valid_nickname("ünïcødé"));
        assert!(valid_nickname(&"a".repeat(20)));
        assert!(!valid_nickname(&"a".repeat(21)));
        assert!(!valid_nickname(""));
        assert!(!valid_nickname("al ice"));
        assert!(!valid_nickname("al\tice"));
        assert!(!valid_nickname("al\u{200D}ice"));
        assert!(!valid_nickname("bell\u{7}"));
    }

    #[test]
    fn nickname_rejects_bidi_and_invisible_characters() {
        for c in ['\u{202A}', '\u{202B}', '\u{202C}', '\u{202D}', '\u{202E}'] {
            assert!(!valid_nickname(&format!("ad{c}nim")), "{:04X}", c as u32);
        }
        for c in ['\u{2066}', '\u{2067}', '\u{2068}', '\u{2069}'] {
            assert!(!valid_nickname(&format!("ad{c}nim")), "{:04X}", c as u32);
        }
        assert!(!valid_nickname("ad\u{061C}min"));
        assert!(!valid_nickname("ad\u{FEFF}min"));
        assert!(!valid_nickname("tag\u{E0041}"));
        assert!(!valid_nickname("ad\u{E000}min"));
        assert!(!valid_nickname("\u{3000}"));
        assert!(valid_nickname("админ"));
        assert!(valid_nickname("مدير"));
    }

    #[test]
    fn image_urls() {
        assert!(valid_image_url("https://example.com/cat.png"));
        assert!(valid_image_url("http://example.com/cat.png?x=1"));
        assert!(!valid_image_url("ftp://example.com/cat.png"));
        assert!(!valid_image_url("https://"));
        assert!(!valid_image_url("https://example.com/a cat.png"));
        assert!(!valid_image_url(""));
    }

    #[test]
    fn help_is_sorted_and_prefixed() {
        let help = help_text();
        assert!(help.starts_with("SYS Available commands: | /admin - "));
        let admin = help.find("/admin").unwrap();
        let who = help.find("/who").unwrap();
        assert!(admin < who);
    }

    #[test]
    fn uptime_formats() {
        assert_eq!(format_uptime(Duration::from_secs(5)), "5s");
        assert_eq!(format_uptime(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_uptime(Duration::from_secs(3 * 3600 + 4 * 60 + 9)), "3h 4m");
        assert_eq!(format_uptime(Duration::from_secs(2 * 86400 + 3 * 3600 + 60)), "2d 3h 1m");
    }
}
