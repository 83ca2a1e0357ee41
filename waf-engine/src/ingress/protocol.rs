//! Request lines understood by the ingress server
//!
//! ```text
//! CLASSIFY <ip> <method> <path> [timestamp]   -> OK <json log entry>
//! STATS                                       -> OK <json summary>
//! TAIL                                        -> one json log entry per line,
//!                                                LAGGED <n> when entries were dropped
//! PAUSE | RESUME                              -> while tailing
//! QUIT
//! ```

use crate::error::{Result, WafError};
use crate::model::Request;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Classify(Request),
    Stats,
    Tail,
    Pause,
    Resume,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

        match verb.to_ascii_uppercase().as_str() {
            "CLASSIFY" => Ok(Command::Classify(Request::parse_line(rest)?)),
            "STATS" => Ok(Command::Stats),
            "TAIL" => Ok(Command::Tail),
            "PAUSE" => Ok(Command::Pause),
            "RESUME" => Ok(Command::Resume),
            "QUIT" => Ok(Command::Quit),
            "" => Err(WafError::MalformedRequest("empty command".to_string())),
            other => Err(WafError::MalformedRequest(format!("unknown command {}", other))),
        }
    }
}
