//! Built-in command set
//!
//! | Category | Commands                                                   |
//! |----------|------------------------------------------------------------|
//! | General  | help, commands, ping, prefix, stats, invite, support,      |
//! |          | dashboard                                                  |
//! | Music    | connect, disconnect, play, queue, now_playing, lyrics,     |
//! |          | effects, equalizer                                         |
//! | Player   | pause, resume, seek, volume, loop, forward, rewind         |
//! | Queue    | clear, shuffle, remove, move, jump, next, previous         |
//! | Playlist | playlists, playlist show/create/delete/load                |
//! | Admin    | ban_user, unban_user, echo, find_servers, shared_servers,  |
//! |          | top_servers                                                |
//! | Owner    | reconnect, set_status, disconnect_all, inspect             |
//!
//! Music, player, queue and playlist commands are thin wrappers over the REST
//! backend, which enforces guild-level permissions and answers with
//! user-facing error messages.

mod admin;
mod general;
mod music;
mod owner;
mod player;
mod playlist;
mod queue;

use crate::api::{int_field, str_field};
use crate::command::{CommandError, Router};
use serde_json::Value;
use std::time::Duration;

/// Tracks listed by `queue` and `playlist show`.
pub const TRACKS_SHOWN: usize = 10;

/// Lines listed by the server lookup commands.
pub const SERVERS_SHOWN: usize = 15;

/// Longest reply body before it is cut with a dashboard link.
pub const EMBED_MAX_LENGTH: usize = 1000;

const BAR_LENGTH: usize = 20;
const CODE_BAR_LENGTH: usize = 26;

/// Build the frozen registry of every built-in command.
pub fn registry() -> Router {
    Router::builder()
        .extend(general::commands())
        .extend(music::commands())
        .extend(player::commands())
        .extend(queue::commands())
        .extend(playlist::commands())
        .extend(admin::commands())
        .extend(owner::commands())
        .build()
}

/// `[title](uri)`, optionally followed by the requester.
pub fn format_track(track: &Value, with_author: bool) -> String {
    let mut out = format!("[{}]({})", str_field(track, "title"), str_field(track, "uri"));
    if with_author {
        out.push_str(&format!(" - <@{}>", int_field(track, "author")));
    }
    out
}

/// `name `id` (n members)`
pub fn format_guild(guild: &Value) -> String {
    format!(
        "{} `{}` ({} members)",
        str_field(guild, "name"),
        int_field(guild, "id"),
        int_field(guild, "member_count")
    )
}

/// Progress bar for `amount` within `[minimum, maximum]`. The code variant
/// is wider and renders inside a code block.
pub fn format_bar(amount: f64, minimum: f64, maximum: f64, code: bool) -> String {
    let (dash, knob, length) = if code {
        ("─", "◯", CODE_BAR_LENGTH)
    } else {
        ("▬", "⚪", BAR_LENGTH)
    };
    let span = maximum - minimum;
    let ratio = if span > 0.0 {
        ((amount - minimum) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let before = (ratio * length as f64).round() as usize;
    format!("{}{}{}", dash.repeat(before), knob, dash.repeat(length - before))
}

/// Keep the first `max_lines` lines and count the rest.
pub fn shorten_lines(lines: &[String], max_lines: usize) -> String {
    let mut out: String = lines
        .iter()
        .take(max_lines)
        .map(|line| format!("{}\n", line))
        .collect();
    if lines.len() > max_lines {
        out.push_str(&format!("\n...and {} more.", lines.len() - max_lines));
    }
    out
}

/// Cut `content` to fit an embed with `hint` appended, on a char boundary.
pub fn truncate_with_hint(content: &str, hint: &str) -> String {
    if content.len() <= EMBED_MAX_LENGTH {
        return content.to_string();
    }
    let mut end = EMBED_MAX_LENGTH.saturating_sub(hint.len());
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &content[..end], hint)
}

/// Milliseconds as `MM:SS`, or `HH:MM:SS` from an hour up.
pub fn format_position(ms: i64) -> String {
    let total = ms.max(0) / 1000;
    let (hours, minutes, seconds) = (total / 3600, (total / 60) % 60, total % 60);
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", total / 60, seconds)
    }
}

/// `1d 2h 3m 4s`; the day part only when non-zero.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total / 3600) % 24;
    let minutes = (total / 60) % 60;
    let seconds = total % 60;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{}d ", days));
    }
    out.push_str(&format!("{}h {}m {}s", hours, minutes, seconds));
    out
}

/// Queue entry addressed by a 1-based position typed by the user.
fn queue_entry<'a>(queue: &'a [Value], item: i64, name: &str) -> Result<(i64, &'a Value), CommandError> {
    let index = item - 1;
    usize::try_from(index)
        .ok()
        .and_then(|i| queue.get(i))
        .map(|track| (index, track))
        .ok_or_else(|| CommandError::InvalidArgument {
            name: name.to_string(),
            kind: "a position in the queue",
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_track() {
        let track = json!({"title": "Song", "uri": "https://x/1", "author": "42"});
        assert_eq!(format_track(&track, false), "[Song](https://x/1)");
        assert_eq!(format_track(&track, true), "[Song](https://x/1) - <@42>");
    }

    #[test]
    fn test_format_position() {
        assert_eq!(format_position(0), "00:00");
        assert_eq!(format_position(65_000), "01:05");
        assert_eq!(format_position(3_725_000), "01:02:05");
        assert_eq!(format_position(-10), "00:00");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(59)), "0h 0m 59s");
        assert_eq!(format_duration(Duration::from_secs(90_061)), "1d 1h 1m 1s");
    }

    #[test]
    fn test_format_bar() {
        assert_eq!(format_bar(0.0, 0.0, 100.0, false), format!("⚪{}", "▬".repeat(20)));
        assert_eq!(format_bar(50.0, 0.0, 100.0, false), format!("{}⚪{}", "▬".repeat(10), "▬".repeat(10)));
        assert_eq!(format_bar(500.0, 0.0, 100.0, false), format!("{}⚪", "▬".repeat(20)));
        assert_eq!(format_bar(0.0, -1.0, 1.0, true), format!("{}◯{}", "─".repeat(13), "─".repeat(13)));
        assert_eq!(format_bar(3.0, 0.0, 0.0, false), format!("⚪{}", "▬".repeat(20)));
    }

    #[test]
    fn test_format_guild() {
        let guild = json!({"id": "81384788765712384", "name": "Lounge", "member_count": 12});
        assert_eq!(format_guild(&guild), "Lounge `81384788765712384` (12 members)");
    }

    #[test]
    fn test_shorten_lines() {
        let lines: Vec<String> = (1..=4).map(|i| format!("line {}", i)).collect();
        assert_eq!(shorten_lines(&lines, 5), "line 1\nline 2\nline 3\nline 4\n");
        assert_eq!(shorten_lines(&lines, 2), "line 1\nline 2\n\n...and 2 more.");
    }

    #[test]
    fn test_truncate_with_hint() {
        assert_eq!(truncate_with_hint("short", "!"), "short");
        let long = "é".repeat(EMBED_MAX_LENGTH);
        let cut = truncate_with_hint(&long, "\n[more](x)");
        assert!(cut.len() <= EMBED_MAX_LENGTH);
        assert!(cut.ends_with("\n[more](x)"));
    }

    #[test]
    fn test_queue_entry_bounds() {
        let queue = vec![json!({"title": "a"}), json!({"title": "b"})];
        assert_eq!(queue_entry(&queue, 2, "item").unwrap().0, 1);
        assert!(queue_entry(&queue, 0, "item").is_err());
        assert!(queue_entry(&queue, 3, "item").is_err());
    }

    #[test]
    fn test_registry_names_unique() {
        let router = registry();
        let mut names: Vec<&str> = router.commands().iter().map(|c| c.name).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
        assert!(router.find("playlist show").is_some());
        assert!(router.find("inspect").is_some());
        assert!(router.find("now_playing").is_some());
        assert!(router.find("top_servers").is_some());
    }
}
