// src/command.rs
//
// Single-character command alphabet and the interactive exchange pairing one
// command byte with at most one reply line. The alphabet is configuration:
// the device, not this crate, defines what each character means.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::connection::DeviceLink;
use crate::error::{Error, Result};

/// Built-in alphabet: LED commands elicit no reply, the temperature query
/// elicits exactly one line.
static STANDARD_COMMANDS: Lazy<CommandSet> = Lazy::new(|| {
    CommandSet::from_entries([
        ('r', false),
        ('g', false),
        ('b', false),
        ('o', false),
        ('t', true),
    ])
});

/// Table of known commands and whether each expects one reply line.
/// Characters outside the table are still transmittable; they just default to
/// not waiting for a reply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSet {
    expects_reply: HashMap<char, bool>,
}

impl CommandSet {
    pub fn from_entries<I: IntoIterator<Item = (char, bool)>>(entries: I) -> Self {
        Self {
            expects_reply: entries.into_iter().collect(),
        }
    }

    /// The built-in `r`/`g`/`b`/`o`/`t` alphabet.
    pub fn standard() -> Self {
        STANDARD_COMMANDS.clone()
    }

    pub fn insert(&mut self, command: char, expects_reply: bool) {
        self.expects_reply.insert(command, expects_reply);
    }

    pub fn contains(&self, command: char) -> bool {
        self.expects_reply.contains_key(&command)
    }

    /// Whether `command` is documented to reply. Unknown commands do not wait.
    pub fn expects_reply(&self, command: char) -> bool {
        self.expects_reply.get(&command).copied().unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.expects_reply.is_empty()
    }

    pub fn len(&self) -> usize {
        self.expects_reply.len()
    }
}

/// One interactive request: a command character and whether to await a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: char,
    pub expect_reply: bool,
}

impl CommandRequest {
    pub fn new(command: char, expect_reply: bool) -> Self {
        Self {
            command,
            expect_reply,
        }
    }

    /// Build a request with the reply expectation the alphabet documents.
    pub fn from_set(set: &CommandSet, command: char) -> Self {
        Self {
            command,
            expect_reply: set.expects_reply(command),
        }
    }
}

/// The reply line, present only for requests that expect one.
pub type CommandReply = Option<String>;

/// Perform one command/reply exchange against an exclusively held link:
/// exactly one byte out, and one line in only when the request expects it.
pub(crate) fn exchange(link: &mut dyn DeviceLink, request: CommandRequest) -> Result<CommandReply> {
    if !request.command.is_ascii() {
        return Err(Error::Config(format!(
            "command '{}' is not a single ASCII character",
            request.command
        )));
    }
    link.write_byte(request.command as u8)?;
    if !request.expect_reply {
        return Ok(None);
    }
    let mut line = String::new();
    link.read_line(&mut line)?;
    Ok(Some(line))
}
