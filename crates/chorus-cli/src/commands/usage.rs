//! /usage command - token usage for this process

use super::{CommandContext, CommandResult};
use crate::utils::format_number;

pub struct UsageCommand;

impl UsageCommand {
    pub fn execute(ctx: &CommandContext<'_>) -> CommandResult {
        let usage = &ctx.usage;

        let mut output = String::from("Usage\n");
        output.push_str(&"-".repeat(40));
        output.push('\n');
        output.push_str(&format!(
            "Model:      {} ({})\n",
            ctx.model.id,
            ctx.model.provider.name()
        ));
        output.push('\n');

        output.push_str("Token Usage:\n");
        output.push_str(&format!("  Input:       {:>8}\n", format_number(usage.input)));
        output.push_str(&format!("  Output:      {:>8}\n", format_number(usage.output)));
        if usage.cache_read > 0 {
            output.push_str(&format!(
                "  Cache read:  {:>8}\n",
                format_number(usage.cache_read)
            ));
        }
        output.push('\n');

        let cost = usage.calculate_cost(ctx.model);
        output.push_str(&format!("Estimated cost: ${:.4}", cost));

        CommandResult::Message(output)
    }
}
