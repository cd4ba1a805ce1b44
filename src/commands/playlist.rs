use super::{format_position, format_track, TRACKS_SHOWN};
use crate::api::{endpoints, int_field, str_field};
use crate::command::{ArgKind, ArgSpec, Category, Command, CommandContext, CommandError, CommandResult, Reply};
use serde_json::{json, Value};

const NOT_FOUND: &str = "The specified playlist could not be found.";

pub fn commands() -> Vec<Command> {
    vec![
        Command::build("playlists")
            .aliases(&["playlist", "pl"])
            .category(Category::Playlist)
            .describe("List the playlists of this server.")
            .run(playlists),
        Command::build("playlist show")
            .aliases(&["pl show", "playlist view", "pl view"])
            .arg(ArgSpec::required("name", ArgKind::String))
            .category(Category::Playlist)
            .describe("Show the tracks in a playlist.")
            .run(show),
        Command::build("playlist create")
            .aliases(&["pl create", "playlist new", "pl new"])
            .arg(ArgSpec::required("name", ArgKind::String))
            .category(Category::Playlist)
            .describe("Create an empty playlist.")
            .run(create),
        Command::build("playlist delete")
            .aliases(&["pl delete", "playlist del", "pl del"])
            .arg(ArgSpec::required("name", ArgKind::String))
            .category(Category::Playlist)
            .describe("Delete a playlist.")
            .run(delete),
        Command::build("playlist load")
            .aliases(&["pl load"])
            .arg(ArgSpec::required("name", ArgKind::String))
            .category(Category::Playlist)
            .describe("Append a playlist to the queue.")
            .run(load),
    ]
}

fn items(playlist: &Value) -> &[Value] {
    playlist
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Case-insensitive lookup by playlist name.
fn find_playlist<'a>(playlists: &'a [Value], name: &str) -> Option<&'a Value> {
    let wanted = name.to_lowercase();
    playlists
        .iter()
        .find(|p| str_field(p, "name").to_lowercase() == wanted)
}

async fn fetch_playlists(ctx: &CommandContext, guild_id: u64) -> Result<Vec<Value>, CommandError> {
    Ok(ctx
        .api()
        .get_array(ctx.author(), &endpoints::guild_playlists(guild_id))
        .await?)
}

fn playlist_listing(playlists: &[Value]) -> String {
    playlists
        .iter()
        .map(|p| format!("{} `[{} tracks]`\n", str_field(p, "name"), items(p).len()))
        .collect()
}

fn playlist_detail(playlist: &Value) -> String {
    let mut content = format!(
        "**{}** - <@{}>\n\n",
        str_field(playlist, "name"),
        int_field(playlist, "author")
    );
    for (index, track) in items(playlist).iter().take(TRACKS_SHOWN).enumerate() {
        content.push_str(&format!(
            "{}. {} `[{}]`\n",
            index + 1,
            format_track(track, false),
            format_position(int_field(track, "length"))
        ));
    }
    content
}

async fn playlists(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let playlists = fetch_playlists(&ctx, guild_id).await?;

    let mut content = playlist_listing(&playlists);
    if content.is_empty() {
        return Ok(Reply::text("There are no playlists. Create one!"));
    }
    content.push_str(&format!(
        "\n[View all the playlists here]({})",
        ctx.coordinator.dashboard_url(guild_id, "playlists")
    ));
    Ok(Reply::text(content))
}

async fn show(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let playlists = fetch_playlists(&ctx, guild_id).await?;
    let Some(selected) = find_playlist(&playlists, ctx.required_str(0)?) else {
        return Ok(Reply::error(NOT_FOUND));
    };

    let mut content = playlist_detail(selected);
    content.push_str(&format!(
        "\n[View the full playlist here]({})",
        ctx.coordinator.dashboard_url(guild_id, "playlists")
    ));
    Ok(Reply::text(content))
}

async fn create(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let name = ctx.required_str(0)?;
    ctx.api()
        .post(
            ctx.author(),
            &endpoints::guild_playlists(guild_id),
            Some(json!({ "name": name })),
        )
        .await?;
    Ok(Reply::text(format!("Created a new playlist '{}'.", name)))
}

async fn delete(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let playlists = fetch_playlists(&ctx, guild_id).await?;
    let Some(selected) = find_playlist(&playlists, ctx.required_str(0)?) else {
        return Ok(Reply::error(NOT_FOUND));
    };

    ctx.api()
        .delete(
            ctx.author(),
            &endpoints::guild_playlist(guild_id, int_field(selected, "id")),
        )
        .await?;
    Ok(Reply::text(format!(
        "Deleted the playlist '{}'.",
        str_field(selected, "name")
    )))
}

async fn load(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let playlists = fetch_playlists(&ctx, guild_id).await?;
    let Some(selected) = find_playlist(&playlists, ctx.required_str(0)?) else {
        return Ok(Reply::error(NOT_FOUND));
    };

    ctx.api()
        .post(
            ctx.author(),
            &endpoints::guild_playlist_load(guild_id, int_field(selected, "id")),
            None,
        )
        .await?;
    Ok(Reply::text(format!(
        "Loaded the playlist '{}' to queue.",
        str_field(selected, "name")
    )))
}
