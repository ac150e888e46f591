//! Slash commands for interactive mode

mod memory;
mod thread;
mod usage;

pub use memory::MemoryCommand;
pub use thread::ThreadCommand;
pub use usage::UsageCommand;

use chorus_agent::{Persistence, ThreadId};
use chorus_ai::{Model, Usage};

/// Result of executing a slash command
#[derive(Debug)]
pub enum CommandResult {
    /// Start a fresh conversation thread
    NewThread,
    /// Continue a saved thread
    SwitchThread(ThreadId),
    /// Show a message to the user (not sent to the agents)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// What a command may look at
pub struct CommandContext<'a> {
    pub persistence: &'a Persistence,
    pub thread_id: &'a ThreadId,
    pub model: &'a Model,
    pub usage: Usage,
}

/// Parse and execute a slash command
pub fn execute_command(input: &str, ctx: &CommandContext<'_>) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, ' ');
    let command = parts.next().unwrap_or("").to_lowercase();
    let args = parts.next().map(str::trim).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "quit" | "exit" | "q" => CommandResult::Exit,

        "new" | "n" => CommandResult::NewThread,

        "thread" | "t" => ThreadCommand::show(ctx),

        "threads" => ThreadCommand::list(ctx),

        "switch" | "s" => ThreadCommand::switch(args),

        "remember" | "r" => MemoryCommand::remember(args, ctx),

        "memory" | "m" => MemoryCommand::show(ctx),

        "usage" | "u" => UsageCommand::execute(ctx),

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?         Show this help message
  /thread, /t           Show the current thread
  /threads              List saved threads
  /switch, /s <id>      Continue a saved thread
  /new, /n              Start a new thread
  /remember, /r <list>  Save music preferences for the verified customer
  /memory, /m           Show saved music preferences
  /usage, /u            Show token usage
  /quit, /exit, /q      Exit chorus

Examples:
  /remember jazz, Miles Davis   Save two preferences (comma separated)
  /switch 3f1c...               Continue thread 3f1c..."#
        .to_string()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chorus_agent::{Checkpoint, ConversationState, ThreadStatus};
    use chorus_ai::{Message, Provider};

    pub fn model() -> Model {
        chorus_ai::models::resolve_model(Provider::OpenAI, "o3-mini", None)
    }

    /// Save a thread checkpoint with one exchange
    pub fn save_thread(
        persistence: &Persistence,
        id: &str,
        account: Option<&str>,
        status: ThreadStatus,
    ) -> ThreadId {
        let thread_id = ThreadId::parse(id).unwrap();
        let mut state = ConversationState::new();
        if let Some(account) = account {
            state.set_account_id(account).unwrap();
        }
        state.push(Message::user("Hi, my customer id is 10"));
        state.push(Message::assistant("Thanks, how can I help?"));
        persistence
            .checkpoints
            .save(&Checkpoint::new(thread_id.clone(), state, status))
            .unwrap();
        thread_id
    }
}
