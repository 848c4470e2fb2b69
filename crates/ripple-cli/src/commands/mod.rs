//! Slash commands for interactive mode

/// Result of parsing a slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Open the connection
    Connect,
    /// Close the connection and stop reconnecting
    Disconnect,
    /// Show the current endpoint
    ShowUrl,
    /// Switch to a new endpoint
    SetUrl(String),
    /// Show connection status
    Status,
    /// Print the conversation so far
    History,
    /// Start a new chat
    Clear,
    /// Show a message to the user (not sent to the backend)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse a slash command. Returns `None` for plain chat input.
pub fn execute_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "connect" => CommandResult::Connect,

        "disconnect" => CommandResult::Disconnect,

        "url" | "u" if args.is_empty() => CommandResult::ShowUrl,
        "url" | "u" => CommandResult::SetUrl(args.to_string()),

        "status" | "s" => CommandResult::Status,

        "history" => CommandResult::History,

        "clear" | "new" | "c" => CommandResult::Clear,

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?         Show this help message
  /connect              Connect to the endpoint
  /disconnect           Disconnect and stop reconnecting
  /url, /u [address]    Show the endpoint or switch to a new one
  /status, /s           Show connection status
  /history              Print the conversation so far
  /clear, /new, /c      Start a new chat
  /quit, /exit, /q      Exit ripple

Anything else is sent as a chat message.

Examples:
  /url wss://chat.example.com/ws   Use a different backend
  /connect                         Reconnect after giving up"#
        .to_string()
}
