//! /remember and /memory - long-term music preferences

use super::{CommandContext, CommandResult};

pub struct MemoryCommand;

impl MemoryCommand {
    /// Save comma-separated preferences for the thread's verified account
    pub fn remember(args: &str, ctx: &CommandContext<'_>) -> CommandResult {
        let preferences: Vec<&str> = args
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if preferences.is_empty() {
            return CommandResult::Message("Usage: /remember <preference>[, <preference>...]".to_string());
        }

        let Some(account_id) = verified_account(ctx) else {
            return CommandResult::Message(
                "Preferences can only be saved once the account is verified.".to_string(),
            );
        };

        match ctx
            .persistence
            .memory
            .remember_preferences(&account_id, preferences)
        {
            Ok(profile) => CommandResult::Message(format!(
                "Saved preferences for customer {}: {}",
                account_id,
                profile.music_preferences.join(", ")
            )),
            Err(e) => CommandResult::Message(format!("Failed to save preferences: {}", e)),
        }
    }

    pub fn show(ctx: &CommandContext<'_>) -> CommandResult {
        let Some(account_id) = verified_account(ctx) else {
            return CommandResult::Message("No verified account in this thread.".to_string());
        };
        let preferences = ctx
            .persistence
            .memory
            .profile(&account_id)
            .map(|p| p.music_preferences)
            .unwrap_or_default();
        if preferences.is_empty() {
            CommandResult::Message(format!("No saved preferences for customer {}.", account_id))
        } else {
            CommandResult::Message(format!(
                "Music preferences for customer {}: {}",
                account_id,
                preferences.join(", ")
            ))
        }
    }
}

fn verified_account(ctx: &CommandContext<'_>) -> Option<String> {
    let checkpoint = ctx.persistence.checkpoints.load(ctx.thread_id).ok()??;
    checkpoint.state.account_id().map(str::to_string)
}
