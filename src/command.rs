//! The command-pattern engine: a named command string plus the regex its
//! response must match, invoked with per-command retries and an
//! all-or-nothing batch contract (`original_source/commandbmc.py`).

use crate::error::{BmcError, BmcResult};
use crate::telnet::TelnetTransport;
use regex::Regex;
use std::collections::HashMap;

pub struct Command {
    pub name: &'static str,
    pub text: String,
    pub response_regex: Regex,
}

impl Command {
    pub fn new(name: &'static str, text: impl Into<String>, response_regex: Regex) -> Self {
        Command {
            name,
            text: text.into(),
            response_regex,
        }
    }

    /// Sends `text` terminated by the transport's line ending, then reads
    /// lines (accumulating them) until the response regex matches. Named
    /// capture groups from the eventual match are returned so callers
    /// (e.g. a pin updating `logic_level`) can read them back out.
    pub async fn execute(&self, transport: &dyn TelnetTransport) -> BmcResult<HashMap<String, String>> {
        transport
            .write(&format!("{}{}", self.text, transport.crlf()))
            .await?;

        let mut response_text = String::new();
        loop {
            let line = transport.read_line().await?;
            response_text.push_str(&line);
            if let Some(caps) = self.response_regex.captures(&response_text) {
                return Ok(named_captures(&self.response_regex, &caps));
            }
        }
    }
}

fn named_captures(re: &Regex, caps: &regex::Captures) -> HashMap<String, String> {
    re.capture_names()
        .flatten()
        .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
        .collect()
}

/// Retries each command up to `retries` times; the whole batch fails (and
/// stops, executing no further commands) the moment one command exhausts
/// its retries without a match (`commandbmc.py::CommandInvoker.invoke`).
pub struct CommandInvoker {
    retries: u32,
}

impl Default for CommandInvoker {
    fn default() -> Self {
        CommandInvoker { retries: 2 }
    }
}

impl CommandInvoker {
    pub fn new(retries: u32) -> Self {
        CommandInvoker { retries }
    }

    pub async fn invoke(
        &self,
        transport: &dyn TelnetTransport,
        commands: &[Command],
    ) -> BmcResult<Vec<HashMap<String, String>>> {
        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            let mut tries = 0;
            let mut handled = None;
            while handled.is_none() && tries < self.retries {
                tries += 1;
                tracing::debug!(command = command.name, attempt = tries, "executing command");
                match command.execute(transport).await {
                    Ok(caps) => {
                        tracing::debug!(command = command.name, "command succeeded");
                        handled = Some(caps);
                    }
                    Err(e) => {
                        tracing::warn!(command = command.name, attempt = tries, error = %e, "command attempt failed");
                    }
                }
            }
            match handled {
                Some(caps) => results.push(caps),
                None => {
                    return Err(BmcError::Unspecified(anyhow::anyhow!(
                        "command {} did not succeed after {} attempts",
                        command.name,
                        self.retries
                    )));
                }
            }
        }
        Ok(results)
    }
}
