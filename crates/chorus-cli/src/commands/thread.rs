//! /thread, /threads and /switch

use chorus_agent::{Checkpoint, ThreadId, ThreadStatus};

use super::{CommandContext, CommandResult};

pub struct ThreadCommand;

impl ThreadCommand {
    pub fn show(ctx: &CommandContext<'_>) -> CommandResult {
        let checkpoint = match ctx.persistence.checkpoints.load(ctx.thread_id) {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => {
                return CommandResult::Message(format!(
                    "Thread {}\nNo messages yet.",
                    ctx.thread_id
                ));
            }
            Err(e) => return CommandResult::Message(format!("Failed to load thread: {}", e)),
        };

        let messages = checkpoint.state.messages();
        let count = |role: &str| messages.iter().filter(|m| m.role() == role).count();

        let mut output = format!("Thread {}\n", checkpoint.thread_id);
        output.push_str(&"-".repeat(40));
        output.push('\n');
        output.push_str(&format!("Status:     {}\n", status_label(&checkpoint.status)));
        output.push_str(&format!(
            "Account:    {}\n",
            checkpoint.state.account_id().unwrap_or("not verified")
        ));
        output.push_str(&format!("Messages:   {} total\n", messages.len()));
        output.push_str(&format!(
            "            {} user, {} assistant, {} tool results\n",
            count("user"),
            count("assistant"),
            count("tool_result")
        ));
        output.push_str(&format!("Updated:    {}", updated_display(&checkpoint)));
        CommandResult::Message(output)
    }

    pub fn list(ctx: &CommandContext<'_>) -> CommandResult {
        let ids = match ctx.persistence.checkpoints.list() {
            Ok(ids) => ids,
            Err(e) => return CommandResult::Message(format!("Failed to list threads: {}", e)),
        };
        if ids.is_empty() {
            return CommandResult::Message("No saved threads.".to_string());
        }

        let mut output = format!("{:<38} {:<10} {:<10} {:<6} Updated\n", "ID", "Status", "Account", "Msgs");
        output.push_str(&"-".repeat(84));
        for id in ids {
            let Ok(Some(checkpoint)) = ctx.persistence.checkpoints.load(&id) else {
                continue;
            };
            let marker = if &id == ctx.thread_id { "*" } else { "" };
            output.push_str(&format!(
                "\n{:<38} {:<10} {:<10} {:<6} {}",
                format!("{}{}", id, marker),
                status_label(&checkpoint.status),
                checkpoint.state.account_id().unwrap_or("-"),
                checkpoint.state.messages().len(),
                updated_display(&checkpoint)
            ));
        }
        CommandResult::Message(output)
    }

    pub fn switch(args: &str) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message("Usage: /switch <thread-id>".to_string());
        }
        match ThreadId::parse(args) {
            Ok(id) => CommandResult::SwitchThread(id),
            Err(e) => CommandResult::Message(e.to_string()),
        }
    }
}

fn status_label(status: &ThreadStatus) -> &'static str {
    match status {
        ThreadStatus::Suspended { .. } => "waiting",
        ThreadStatus::Done => "done",
    }
}

fn updated_display(checkpoint: &Checkpoint) -> String {
    chrono::DateTime::from_timestamp_millis(checkpoint.updated_at)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
