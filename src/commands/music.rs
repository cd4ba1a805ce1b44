use super::{format_bar, format_position, format_track, truncate_with_hint, TRACKS_SHOWN};
use crate::api::{endpoints, float_field, int_field, str_field};
use crate::command::{ArgKind, ArgSpec, Category, Command, CommandContext, CommandError, CommandResult, Reply};
use crate::models::Embed;
use serde_json::{json, Value};
use tracing::debug;

pub fn commands() -> Vec<Command> {
    vec![
        Command::build("connect")
            .aliases(&["join"])
            .category(Category::Music)
            .describe("Join your voice channel.")
            .run(connect),
        Command::build("disconnect")
            .aliases(&["leave", "dc"])
            .category(Category::Music)
            .describe("Leave the voice channel.")
            .run(disconnect),
        Command::build("play")
            .aliases(&["p"])
            .arg(ArgSpec::required("query", ArgKind::String))
            .category(Category::Music)
            .describe("Search for a track and add it to the queue.")
            .run(play),
        Command::build("queue")
            .aliases(&["q"])
            .category(Category::Music)
            .describe("Show the current track and what plays next.")
            .run(queue),
        Command::build("now_playing")
            .aliases(&["np", "playing"])
            .category(Category::Music)
            .describe("Show the track being played and its progress.")
            .run(now_playing),
        Command::build("lyrics")
            .aliases(&["l"])
            .category(Category::Music)
            .describe("Show the lyrics of the track being played.")
            .run(lyrics),
        Command::build("effects")
            .aliases(&["filters"])
            .category(Category::Music)
            .describe("Show the audio effects of the player.")
            .run(effects),
        Command::build("equalizer")
            .aliases(&["eq"])
            .category(Category::Music)
            .describe("Show the equalizer bands of the player.")
            .run(equalizer),
    ]
}

const NOTHING_PLAYING: &str = "Nothing is currently playing.";

static NULL: Value = Value::Null;

/// Effect groups as `(title, key, [(label, field)])` in display order.
const EFFECT_GROUPS: &[(&str, &str, &[(&str, &str)])] = &[
    ("Timescale", "timescale", &[("Speed", "speed"), ("Pitch", "pitch"), ("Rate", "rate")]),
    ("Tremolo", "tremolo", &[("Depth", "depth"), ("Frequency", "frequency")]),
    ("Vibrato", "vibrato", &[("Depth", "depth"), ("Frequency", "frequency")]),
    (
        "Karaoke",
        "karaoke",
        &[
            ("Level", "level"),
            ("Mono Level", "monoLevel"),
            ("Band", "filterBand"),
            ("Width", "filterWidth"),
        ],
    ),
];

async fn connect(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    ctx.api()
        .post(ctx.author(), &endpoints::guild_player(guild_id), None)
        .await?;
    Ok(Reply::text("Connected to the channel."))
}

async fn disconnect(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    ctx.api()
        .delete(ctx.author(), &endpoints::guild_player(guild_id))
        .await?;
    Ok(Reply::text("Disconnected from the channel."))
}

async fn play(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let query = ctx.required_str(0)?;
    let api = ctx.api();
    let player = endpoints::guild_player(guild_id);

    let tracks = api.get_array(ctx.author(), &endpoints::track_query(query)).await?;
    let Some(track) = tracks.first() else {
        return Ok(Reply::error("There are no tracks found."));
    };

    // The backend answers 400 when there is no player yet.
    match api.get(ctx.author(), &player).await {
        Ok(_) => {}
        Err(e) if e.status() == Some(400) => {
            api.post(ctx.author(), &player, None).await?;
            if ctx.coordinator.wait_for_voice(guild_id).await.is_none() {
                debug!(guild = guild_id, "Voice state never arrived after connecting");
                return Ok(Reply::None);
            }
        }
        Err(e) => return Err(e.into()),
    }

    api.post(
        ctx.author(),
        &endpoints::guild_queue(guild_id),
        Some(json!({ "track": str_field(track, "track") })),
    )
    .await?;

    Ok(Reply::text(format!("Added {} to the queue.", format_track(track, false))))
}

fn queue_listing(queue: &[Value], playing: i64) -> String {
    let mut content = String::from("__**Now Playing**__\n");

    let upcoming: Vec<(usize, &Value)> = if playing < 0 {
        content.push_str("There is nothing being currently played.\n");
        queue.iter().enumerate().take(TRACKS_SHOWN).collect()
    } else {
        let current = playing as usize;
        let mut shown = queue.iter().enumerate().skip(current).take(TRACKS_SHOWN);
        if let Some((_, track)) = shown.next() {
            content.push_str(&format!(
                "{} `[{}]`\n",
                format_track(track, true),
                format_position(int_field(track, "length"))
            ));
        }
        shown.collect()
    };

    if !upcoming.is_empty() {
        content.push_str("\n__**Next Up**__\n");
        for (index, track) in upcoming {
            content.push_str(&format!(
                "{}. {} `[{}]`\n",
                index + 1,
                format_track(track, false),
                format_position(int_field(track, "length"))
            ));
        }
    }
    content
}

async fn queue(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let api = ctx.api();

    let queue = api.get_array(ctx.author(), &endpoints::guild_queue(guild_id)).await?;
    let player = api.get(ctx.author(), &endpoints::guild_player(guild_id)).await?;

    if queue.is_empty() {
        return Ok(Reply::text("There is nothing in the queue."));
    }

    let mut content = queue_listing(&queue, int_field(&player, "playing"));
    content.push_str(&format!(
        "\n[View the full queue here]({})",
        ctx.coordinator.dashboard_url(guild_id, "player")
    ));
    Ok(Reply::text(content))
}

/// The queue entry under the player's `playing` index, with the player.
async fn current_track(ctx: &CommandContext, guild_id: u64) -> Result<Option<(Value, Value)>, CommandError> {
    let api = ctx.api();
    let queue = api.get_array(ctx.author(), &endpoints::guild_queue(guild_id)).await?;
    let player = api.get(ctx.author(), &endpoints::guild_player(guild_id)).await?;

    let track = usize::try_from(int_field(&player, "playing"))
        .ok()
        .and_then(|index| queue.into_iter().nth(index));
    Ok(track.map(|track| (track, player)))
}

fn youtube_id(uri: &str) -> Option<&str> {
    if !uri.contains("youtube.com/") {
        return None;
    }
    let (_, rest) = uri.split_once("?v=")?;
    rest.split('&').next().filter(|id| !id.is_empty())
}

fn now_playing_embed(base: Embed, track: &Value, position: i64) -> Embed {
    let length = int_field(track, "length");
    let embed = base.footer(format!(
        "{} {} / {}",
        format_bar(position as f64, 0.0, length as f64, false),
        format_position(position),
        format_position(length)
    ));
    match youtube_id(str_field(track, "uri")) {
        Some(id) => embed.thumbnail(format!("https://img.youtube.com/vi/{}/mqdefault.jpg", id)),
        None => embed,
    }
}

async fn now_playing(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let Some((track, player)) = current_track(&ctx, guild_id).await? else {
        return Ok(Reply::text(NOTHING_PLAYING));
    };

    let base = ctx
        .coordinator
        .embed(Some(guild_id), "Now Playing", format_track(&track, true));
    Ok(Reply::Embed(now_playing_embed(base, &track, int_field(&player, "position"))))
}

async fn lyrics(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let Some((track, _)) = current_track(&ctx, guild_id).await? else {
        return Ok(Reply::text(NOTHING_PLAYING));
    };

    let lyrics = ctx
        .api()
        .get(ctx.author(), &endpoints::track_lyrics(str_field(&track, "track")))
        .await?;
    let content = format!(
        "__**{}**__\n\n{}",
        str_field(&lyrics, "title"),
        str_field(&lyrics, "content")
    );
    let hint = format!(
        "\n\n[View the full lyrics here]({})",
        ctx.coordinator.dashboard_url(guild_id, "lyrics")
    );
    Ok(Reply::text(truncate_with_hint(&content, &hint)))
}

fn effects_listing(filters: &Value) -> String {
    let mut content = String::new();
    for (title, key, rows) in EFFECT_GROUPS {
        let group = filters.get(*key).unwrap_or(&NULL);
        content.push_str(&format!("__**{}**__\n```\n", title));
        for (label, field) in rows.iter() {
            content.push_str(&format!("{:<16}{:.1}\n", format!("{}:", label), float_field(group, field)));
        }
        content.push_str("```\n");
    }
    content
}

/// One code-bar per band. Cuts reach -0.25 and boosts 1.0, so cuts are
/// scaled by 4 to share the bar.
fn equalizer_listing(filters: &Value) -> String {
    let bands = filters
        .get("equalizer")
        .and_then(|eq| eq.get("bands"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut content = String::from("```\n");
    for band in bands {
        let mut gain = float_field(band, "gain");
        if gain < 0.0 {
            gain *= 4.0;
        }
        content.push_str(&format!(
            "B{:<2} {}\n",
            int_field(band, "band"),
            format_bar(gain, -1.0, 1.0, true)
        ));
    }
    content.push_str("```\n");
    content
}

async fn player_filters(ctx: &CommandContext, guild_id: u64) -> Result<Value, CommandError> {
    let mut player = ctx
        .api()
        .get(ctx.author(), &endpoints::guild_player(guild_id))
        .await?;
    Ok(player.get_mut("filters").map(Value::take).unwrap_or_default())
}

async fn effects(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let mut content = effects_listing(&player_filters(&ctx, guild_id).await?);
    content.push_str(&format!(
        "[Adjust the effects here]({})",
        ctx.coordinator.dashboard_url(guild_id, "effects")
    ));
    Ok(Reply::text(content))
}

async fn equalizer(ctx: CommandContext) -> CommandResult {
    let guild_id = ctx.guild_id()?;
    let mut content = equalizer_listing(&player_filters(&ctx, guild_id).await?);
    content.push_str(&format!(
        "[Adjust the equalizer here]({})",
        ctx.coordinator.dashboard_url(guild_id, "equalizer")
    ));
    Ok(Reply::text(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracks(n: usize) -> Vec<Value> {
        (1..=n)
            .map(|i| json!({"title": format!("t{}", i), "uri": format!("u{}", i), "author": "5", "length": 61_000}))
            .collect()
    }

    #[test]
    fn test_queue_listing_nothing_playing() {
        let listing = queue_listing(&tracks(2), -1);
        assert_eq!(
            listing,
            "__**Now Playing**__\nThere is nothing being currently played.\n\n__**Next Up**__\n\
             1. [t1](u1) `[01:01]`\n2. [t2](u2) `[01:01]`\n"
        );
    }

    #[test]
    fn test_queue_listing_window() {
        let listing = queue_listing(&tracks(15), 2);
        assert!(listing.starts_with("__**Now Playing**__\n[t3](u3) - <@5> `[01:01]`\n"));
        assert!(listing.contains("\n4. [t4](u4)"));
        assert!(listing.contains("\n12. [t12](u12)"));
        assert!(!listing.contains("13. "));
    }

    #[test]
    fn test_youtube_id() {
        assert_eq!(youtube_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), Some("dQw4w9WgXcQ"));
        assert_eq!(youtube_id("https://www.youtube.com/watch?v=abc&t=10"), Some("abc"));
        assert_eq!(youtube_id("https://soundcloud.com/a/b"), None);
    }

    #[test]
    fn test_now_playing_embed() {
        let track = json!({
            "title": "Song",
            "uri": "https://www.youtube.com/watch?v=xyz",
            "author": "5",
            "length": 200_000
        });
        let embed = now_playing_embed(Embed::new("Now Playing", "d"), &track, 100_000);
        let footer = embed.footer.unwrap().text;
        assert!(footer.ends_with(" 01:40 / 03:20"));
        assert!(footer.starts_with(&format!("{}⚪", "▬".repeat(10))));
        assert_eq!(
            embed.thumbnail.map(|t| t.url).as_deref(),
            Some("https://img.youtube.com/vi/xyz/mqdefault.jpg")
        );
    }

    #[test]
    fn test_effects_listing() {
        let filters = json!({
            "timescale": {"speed": 1.5, "pitch": 1, "rate": 1},
            "karaoke": {"level": 0.5, "monoLevel": 1, "filterBand": 220, "filterWidth": 100}
        });
        let listing = effects_listing(&filters);
        assert!(listing.starts_with("__**Timescale**__\n```\nSpeed:          1.5\n"));
        assert!(listing.contains("__**Tremolo**__\n```\nDepth:          0.0\nFrequency:      0.0\n```\n"));
        assert!(listing.contains("Mono Level:     1.0\nBand:           220.0\n"));
    }

    #[test]
    fn test_equalizer_listing_scales_cuts() {
        let filters = json!({"equalizer": {"bands": [
            {"band": 0, "gain": 0},
            {"band": 14, "gain": -0.25}
        ]}});
        assert_eq!(
            equalizer_listing(&filters),
            format!(
                "```\nB0  {}◯{}\nB14 ◯{}\n```\n",
                "─".repeat(13),
                "─".repeat(13),
                "─".repeat(26)
            )
        );
        assert_eq!(equalizer_listing(&Value::Null), "```\n```\n");
    }

    #[test]
    fn test_queue_listing_last_track_playing() {
        let listing = queue_listing(&tracks(1), 0);
        assert!(!listing.contains("Next Up"));
    }
}
