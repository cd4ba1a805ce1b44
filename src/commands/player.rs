use super::format_position;
use crate::api::{endpoints, int_field, str_field};
use crate::command::{ArgKind, ArgSpec, Category, Command, CommandContext, CommandError, CommandResult, Reply};
use serde_json::{json, Value};

pub fn commands() -> Vec<Command> {
    vec![
        Command::build("pause")
            .aliases(&["stop"])
            .category(Category::Player)
            .describe("Pause the player.")
            .run(pause),
        Command::build("resume")
            .aliases(&["unpause", "continue"])
            .category(Category::Player)
            .describe("Resume the player.")
            .run(resume),
        Command::build("seek")
            .arg(ArgSpec::required("position", ArgKind::Duration))
            .category(Category::Player)
            .describe("Jump to a position in the current track.")
            .run(seek),
        Command::build("volume")
            .aliases(&["vol"])
            .arg(ArgSpec::required("loudness", ArgKind::Integer))
            .category(Category::Player)
            .describe("Change the player volume.")
            .run(volume),
        Command::build("loop")
            .category(Category::Player)
            .describe("Cycle the loop mode between none, queue and track.")
            .run(cycle_loop),
        Command::build("forward")
            .aliases(&["fw", "fwd"])
            .arg(ArgSpec::required("amount", ArgKind::Duration))
            .category(Category::Player)
            .describe("Skip ahead in the current track.")
            .run(|ctx: CommandContext| async move { shift(ctx, 1).await }),
        Command::build("rewind")
            .aliases(&["rw", "rwd"])
            .arg(ArgSpec::required("amount", ArgKind::Duration))
            .category(Category::Player)
            .describe("Go back in the current track.")
            .run(|ctx: CommandContext| async move { shift(ctx, -1).await }),
    ]
}

async fn update_player(ctx: &CommandContext, body: Value) -> Result<Value, CommandError> {
    let guild_id = ctx.guild_id()?;
    Ok(ctx
        .api()
        .patch(ctx.author(), &endpoints::guild_player(guild_id), body)
        .await?)
}

async fn pause(ctx: CommandContext) -> CommandResult {
    update_player(&ctx, json!({ "paused": true })).await?;
    Ok(Reply::text("The player is paused."))
}

async fn resume(ctx: CommandContext) -> CommandResult {
    update_player(&ctx, json!({ "paused": false })).await?;
    Ok(Reply::text("The player is resumed."))
}

async fn seek(ctx: CommandContext) -> CommandResult {
    let position = ctx.required_millis(0)?;
    update_player(&ctx, json!({ "position": position })).await?;
    Ok(Reply::text(format!(
        "The player position is changed to **{}**.",
        format_position(position)
    )))
}

async fn volume(ctx: CommandContext) -> CommandResult {
    let loudness = ctx.required_int(0)?;
    update_player(&ctx, json!({ "volume": loudness })).await?;
    Ok(Reply::text(format!("The player volume is changed to **{}%**.", loudness)))
}

/// none → queue → track → none
fn next_loop_mode(current: &str) -> &'static str {
    match current {
        "none" => "queue",
        "queue" => "track",
        _ => "none",
    }
}

async fn cycle_loop(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let player = ctx
        .api()
        .get(ctx.author(), &endpoints::guild_player(guild_id))
        .await?;
    let looping = next_loop_mode(str_field(&player, "looping"));
    update_player(&ctx, json!({ "looping": looping })).await?;
    Ok(Reply::text(format!("The player loop is changed to **{}**.", looping)))
}

fn shifted_position(position: i64, direction: i64, amount: i64) -> i64 {
    position.saturating_add(direction.saturating_mul(amount)).max(0)
}

/// Move the position by `amount` in `direction` (1 forward, -1 back).
async fn shift(ctx: CommandContext, direction: i64) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let amount = ctx.required_millis(0)?;

    let player = ctx
        .api()
        .get(ctx.author(), &endpoints::guild_player(guild_id))
        .await?;
    let position = shifted_position(int_field(&player, "position"), direction, amount);

    update_player(&ctx, json!({ "position": position })).await?;

    let verb = if direction > 0 { "forwarded" } else { "rewound" };
    Ok(Reply::text(format!(
        "The player is {} to **{}**.",
        verb,
        format_position(position)
    )))
}
