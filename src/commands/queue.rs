use super::{format_track, queue_entry};
use crate::api::{endpoints, int_field};
use crate::command::{ArgKind, ArgSpec, Category, Command, CommandContext, CommandResult, Reply};
use serde_json::{json, Value};

pub fn commands() -> Vec<Command> {
    vec![
        Command::build("clear")
            .category(Category::Queue)
            .describe("Remove every track from the queue.")
            .run(clear),
        Command::build("shuffle")
            .aliases(&["shuf"])
            .category(Category::Queue)
            .describe("Shuffle the queue.")
            .run(shuffle),
        Command::build("remove")
            .aliases(&["rm", "delete", "del"])
            .arg(ArgSpec::required("item", ArgKind::Integer))
            .category(Category::Queue)
            .describe("Remove a track from the queue.")
            .run(remove),
        Command::build("move")
            .aliases(&["m"])
            .arg(ArgSpec::required("item", ArgKind::Integer))
            .arg(ArgSpec::required("position", ArgKind::Integer))
            .category(Category::Queue)
            .describe("Move a track to another position.")
            .run(move_item),
        Command::build("jump")
            .aliases(&["goto", "j"])
            .arg(ArgSpec::required("item", ArgKind::Integer))
            .category(Category::Queue)
            .describe("Play a track from the queue right away.")
            .run(jump),
        Command::build("next")
            .aliases(&["skip", "s"])
            .category(Category::Queue)
            .describe("Skip to the next track.")
            .run(next),
        Command::build("previous")
            .aliases(&["back", "prev"])
            .category(Category::Queue)
            .describe("Go back to the previous track.")
            .run(previous),
    ]
}

async fn fetch_queue(ctx: &CommandContext, guild_id: u64) -> Result<Vec<Value>, crate::command::CommandError> {
    Ok(ctx
        .api()
        .get_array(ctx.author(), &endpoints::guild_queue(guild_id))
        .await?)
}

async fn set_playing(ctx: &CommandContext, guild_id: u64, playing: i64) -> Result<(), crate::command::CommandError> {
    ctx.api()
        .patch(
            ctx.author(),
            &endpoints::guild_player(guild_id),
            json!({ "playing": playing }),
        )
        .await?;
    Ok(())
}

async fn clear(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let queue = fetch_queue(&ctx, guild_id).await?;
    ctx.api()
        .delete(ctx.author(), &endpoints::guild_queue(guild_id))
        .await?;
    Ok(Reply::text(format!("Removed {} tracks from the queue.", queue.len())))
}

async fn shuffle(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    ctx.api()
        .post(ctx.author(), &endpoints::guild_queue_shuffle(guild_id), None)
        .await?;
    Ok(Reply::text("The queue has been shuffled."))
}

async fn remove(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let queue = fetch_queue(&ctx, guild_id).await?;
    let (index, track) = queue_entry(&queue, ctx.required_int(0)?, "item")?;

    ctx.api()
        .delete(ctx.author(), &endpoints::guild_queue_item(guild_id, index))
        .await?;
    Ok(Reply::text(format!("Removed {} from the queue.", format_track(track, false))))
}

async fn move_item(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let queue = fetch_queue(&ctx, guild_id).await?;
    let (index, track) = queue_entry(&queue, ctx.required_int(0)?, "item")?;
    let (position, _) = queue_entry(&queue, ctx.required_int(1)?, "position")?;

    ctx.api()
        .put(
            ctx.author(),
            &endpoints::guild_queue_item_position(guild_id, index),
            json!({ "position": position }),
        )
        .await?;
    Ok(Reply::text(format!(
        "Moved {} to position {}.",
        format_track(track, false),
        position + 1
    )))
}

async fn jump(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let queue = fetch_queue(&ctx, guild_id).await?;
    let (index, track) = queue_entry(&queue, ctx.required_int(0)?, "item")?;

    set_playing(&ctx, guild_id, index).await?;
    Ok(Reply::text(format!("Jumped to {}.", format_track(track, false))))
}

/// Index after `playing`; past the last track wraps to -1 (nothing playing).
fn next_index(playing: i64, len: usize) -> i64 {
    if playing + 1 >= len as i64 {
        -1
    } else {
        playing + 1
    }
}

/// Index before `playing`; from nothing playing, the last track.
fn previous_index(playing: i64, len: usize) -> i64 {
    if playing < 0 {
        len as i64 - 1
    } else {
        playing - 1
    }
}

async fn next(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let player = ctx
        .api()
        .get(ctx.author(), &endpoints::guild_player(guild_id))
        .await?;
    let queue = fetch_queue(&ctx, guild_id).await?;

    set_playing(&ctx, guild_id, next_index(int_field(&player, "playing"), queue.len())).await?;
    Ok(Reply::text("Skipped to the next track."))
}

async fn previous(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let player = ctx
        .api()
        .get(ctx.author(), &endpoints::guild_player(guild_id))
        .await?;
    let playing = int_field(&player, "playing");
    let len = if playing < 0 {
        fetch_queue(&ctx, guild_id).await?.len()
    } else {
        0
    };

    set_playing(&ctx, guild_id, previous_index(playing, len)).await?;
    Ok(Reply::text("Went back to the previous track."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_index_wraps() {
        assert_eq!(next_index(0, 3), 1);
        assert_eq!(next_index(2, 3), -1);
        assert_eq!(next_index(-1, 3), 0);
    }

    #[test]
    fn test_previous_index() {
        assert_eq!(previous_index(2, 0), 1);
        assert_eq!(previous_index(0, 0), -1);
        assert_eq!(previous_index(-1, 4), 3);
    }
}
