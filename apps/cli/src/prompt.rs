use std::{io::IsTerminal, path::PathBuf};

use console::{Term, style};
use vidpipe_core::paths;

/// A required argument was missing and there was no terminal to ask on.
#[derive(Debug, thiserror::Error)]
#[error("missing required argument <{name}> (pass it on the command line or run in a terminal)")]
pub struct MissingArgument {
    pub name: &'static str,
}

pub fn is_interactive() -> bool {
    std::io::stdin().is_terminal()
}

fn ask(question: &str) -> std::io::Result<String> {
    let term = Term::stdout();
    term.write_str(&format!("{} {}: ", style("?").cyan().bold(), question))?;
    Ok(term.read_line()?.trim().to_string())
}

/// The given value, or an answer read from the terminal.
pub fn require(value: Option<String>, name: &'static str, question: &str) -> anyhow::Result<String> {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        return Ok(value);
    }
    if !is_interactive() {
        return Err(MissingArgument { name }.into());
    }
    loop {
        let answer = ask(question)?;
        if !answer.is_empty() {
            return Ok(answer);
        }
    }
}

pub fn require_path(value: Option<String>, name: &'static str, question: &str) -> anyhow::Result<PathBuf> {
    require(value, name, question).map(|raw| paths::normalize(&raw))
}

/// Ask for an optional value; an empty answer or no terminal gives `None`.
pub fn optional(value: Option<String>, question: &str, ask_user: bool) -> anyhow::Result<Option<String>> {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        return Ok(Some(value));
    }
    if !ask_user || !is_interactive() {
        return Ok(None);
    }
    let answer = ask(question)?;
    Ok(Some(answer).filter(|a| !a.is_empty()))
}
