//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to manage sessions, endpoints and saved prompts without
//! sending messages to the model.

/// A parsed chat command.
///
/// These commands control the REPL and are never sent to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Start a new session and make it active.
    New,

    /// List sessions, newest first.
    Sessions,

    /// Make the n-th listed session (1-based) active.
    Switch(usize),

    /// Delete the n-th listed session (1-based).
    Delete(usize),

    /// Rename the active session.
    Title(String),

    /// Set or clear the system prompt.
    /// `None` clears the current system prompt.
    System(Option<String>),

    /// List configured endpoints.
    Endpoints,

    /// Switch to the named endpoint.
    Endpoint(String),

    /// List saved prompts, optionally only those matching a query.
    Prompts(Option<String>),

    /// Send `input` with the n-th saved prompt (1-based).  The input may be empty.
    Prompt { number: usize, input: String },

    /// Save a new prompt.
    AddPrompt { title: String, content: String },

    /// Delete the n-th saved prompt (1-based).
    RemovePrompt(usize),

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command,
/// or `None` if it should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use streamchat::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/switch 2").is_some());
/// assert!(parse_command("Hello there!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" => ChatCommand::New,
        "sessions" | "ls" => ChatCommand::Sessions,
        "switch" => parse_index(argument, ChatCommand::Switch, "/switch", SESSIONS),
        "delete" | "rm" => parse_index(argument, ChatCommand::Delete, "/delete", SESSIONS),
        "title" => match argument {
            Some(title) => ChatCommand::Title(title.to_string()),
            None => ChatCommand::Invalid("/title requires a title".to_string()),
        },
        "system" => ChatCommand::System(argument.map(|s| s.to_string())),
        "endpoints" => ChatCommand::Endpoints,
        "endpoint" => match argument {
            Some(name) => ChatCommand::Endpoint(name.to_string()),
            None => ChatCommand::Invalid("/endpoint requires an endpoint name".to_string()),
        },
        "prompts" => ChatCommand::Prompts(argument.map(|s| s.to_string())),
        "prompt" => parse_prompt(argument),
        "prompt-add" => parse_add_prompt(argument),
        "prompt-rm" => parse_index(argument, ChatCommand::RemovePrompt, "/prompt-rm", PROMPTS),
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

/// What a numbered argument counts, and the command that lists it.
type Listing = (&'static str, &'static str);

const SESSIONS: Listing = ("session", "/sessions");
const PROMPTS: Listing = ("prompt", "/prompts");

fn parse_index<F>(
    argument: Option<&str>,
    constructor: F,
    name: &str,
    listing: Listing,
) -> ChatCommand
where
    F: Fn(usize) -> ChatCommand,
{
    let (noun, list) = listing;
    match argument.map(str::parse::<usize>) {
        Some(Ok(n)) if n > 0 => constructor(n),
        Some(_) => ChatCommand::Invalid(format!("{name} expects a {noun} number from {list}")),
        None => ChatCommand::Invalid(format!("{name} requires a {noun} number")),
    }
}

fn parse_prompt(argument: Option<&str>) -> ChatCommand {
    let (number, input) = match argument {
        Some(arg) => match arg.split_once(char::is_whitespace) {
            Some((number, input)) => (Some(number), input.trim()),
            None => (Some(arg), ""),
        },
        None => (None, ""),
    };
    let input = input.to_string();
    let constructor = move |number| ChatCommand::Prompt {
        number,
        input: input.clone(),
    };
    parse_index(number, constructor, "/prompt", PROMPTS)
}

fn parse_add_prompt(argument: Option<&str>) -> ChatCommand {
    let parsed = argument.and_then(|arg| arg.split_once('|')).and_then(|(title, content)| {
        let (title, content) = (title.trim(), content.trim());
        (!title.is_empty() && !content.is_empty()).then(|| ChatCommand::AddPrompt {
            title: title.to_string(),
            content: content.to_string(),
        })
    });
    parsed.unwrap_or_else(|| {
        ChatCommand::Invalid("/prompt-add expects <title> | <content>".to_string())
    })
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new                   Start a new session
  /sessions              List sessions (newest first)
  /switch <n>            Switch to session n from /sessions
  /delete <n>            Delete session n from /sessions
  /title <text>          Rename the current session
  /system [prompt]       Set system prompt (no argument clears it)
  /endpoints             List configured endpoints
  /endpoint <name>       Switch to another endpoint
  /prompts [query]       List saved prompts, most used first
  /prompt <n> [text]     Send text with saved prompt n
  /prompt-add <t> | <c>  Save a prompt with title t and content c
  /prompt-rm <n>         Delete saved prompt n
  /help                  Show this help message
  /quit                  Exit the chat

Press Ctrl+C while a reply is streaming to stop it."#
}
