//! Command routing
//!
//! Strips a prefix from the message, then matches the longest registered
//! command name (or alias) against the remainder. The remainder after the
//! name is split on whitespace into arguments; the last declared argument
//! swallows everything left.

use super::args::convert;
use super::{ArgValue, Command, CommandError, Invocation};
use crate::models::Message;
use std::sync::Arc;

/// Prefixes tried in order. Guild messages accept the guild prefix and bot
/// mentions; direct messages accept mentions and any printable ASCII symbol.
pub fn candidate_prefixes(bot_id: u64, guild_prefix: Option<&str>) -> Vec<String> {
    let mentions = [format!("<@{}>", bot_id), format!("<@!{}>", bot_id)];
    match guild_prefix {
        Some(prefix) => {
            let mut prefixes = vec![prefix.to_string()];
            prefixes.extend(mentions);
            prefixes
        }
        None => {
            let mut prefixes: Vec<String> = mentions.into();
            prefixes.extend((33u8..=126).map(|c| (c as char).to_string()));
            prefixes
        }
    }
}

fn match_key(name: &str) -> String {
    format!("{} ", name.replace('_', ""))
}

#[derive(Default)]
pub struct RouterBuilder {
    commands: Vec<Command>,
}

impl RouterBuilder {
    pub fn register(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn extend(mut self, commands: impl IntoIterator<Item = Command>) -> Self {
        self.commands.extend(commands);
        self
    }

    pub fn build(self) -> Router {
        let mut commands: Vec<Arc<Command>> = self.commands.into_iter().map(Arc::new).collect();
        // Longest first so "playlist show" wins over "playlist".
        commands.sort_by(|a, b| b.name.len().cmp(&a.name.len()));
        Router { commands }
    }
}

/// Frozen command registry.
#[derive(Clone, Default)]
pub struct Router {
    commands: Vec<Arc<Command>>,
}

/// A message that matched a command, before argument conversion.
#[derive(Debug, Clone)]
pub struct Matched {
    pub command: Arc<Command>,
    pub prefix: String,
    /// Name or alias that matched.
    pub matched: String,
    pub raw_args: Vec<String>,
}

impl Matched {
    /// Convert raw tokens against the command's argument specs. Missing
    /// required arguments and malformed values are reported by name.
    pub fn parse_args(&self) -> Result<Vec<Option<ArgValue>>, CommandError> {
        let specs = &self.command.args;
        let mut values = Vec::with_capacity(specs.len());

        for (index, spec) in specs.iter().enumerate() {
            let raw = if index + 1 == specs.len() && index < self.raw_args.len() {
                Some(self.raw_args[index..].join(" "))
            } else {
                self.raw_args.get(index).cloned()
            };

            match raw {
                Some(raw) => values.push(Some(convert(spec, &raw)?)),
                None if spec.required => {
                    return Err(CommandError::MissingArgument(spec.name.to_string()))
                }
                None => values.push(None),
            }
        }

        Ok(values)
    }
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    pub fn commands(&self) -> &[Arc<Command>] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<Arc<Command>> {
        let name = name.to_lowercase();
        self.commands
            .iter()
            .find(|c| c.name == name || c.aliases.iter().any(|a| *a == name))
            .cloned()
    }

    /// Match message content against the registry.
    pub fn resolve(&self, content: &str, prefixes: &[String]) -> Option<Matched> {
        let prefix = prefixes.iter().find(|p| content.starts_with(p.as_str()))?;
        let body = content[prefix.len()..].trim();
        if body.is_empty() {
            return None;
        }

        let haystack = format!("{} ", body.to_lowercase());
        let (command, matched) = self.commands.iter().find_map(|command| {
            if haystack.starts_with(&match_key(command.name)) {
                return Some((command, command.name));
            }
            command
                .aliases
                .iter()
                .find(|alias| haystack.starts_with(&match_key(alias)))
                .map(|alias| (command, *alias))
        })?;

        let skip = matched.split(' ').count();
        let raw_args = body
            .split_whitespace()
            .skip(skip)
            .map(str::to_string)
            .collect();

        Some(Matched {
            command: command.clone(),
            prefix: prefix.clone(),
            matched: matched.to_string(),
            raw_args,
        })
    }

    /// Resolve and convert in one step.
    pub fn parse(
        &self,
        message: &Message,
        prefixes: &[String],
        guild_prefix: Option<String>,
    ) -> Result<Option<Invocation>, CommandError> {
        let Some(matched) = self.resolve(&message.content, prefixes) else {
            return Ok(None);
        };
        let args = matched.parse_args()?;
        Ok(Some(Invocation {
            command: matched.command,
            prefix: matched.prefix,
            guild_prefix,
            args,
            message: message.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ArgKind, ArgSpec, Reply};
    use crate::models::User;

    fn command(name: &'static str, args: Vec<ArgSpec>) -> Command {
        let mut builder = Command::build(name);
        for arg in args {
            builder = builder.arg(arg);
        }
        builder.run(|_| async { Ok(Reply::None) })
    }

    fn router() -> Router {
        Router::builder()
            .register(command("playlist", vec![]))
            .register(command(
                "playlist show",
                vec![ArgSpec::required("name", ArgKind::String)],
            ))
            .register(command(
                "ban_user",
                vec![
                    ArgSpec::required("user", ArgKind::User),
                    ArgSpec::required("reason", ArgKind::String),
                ],
            ))
            .register(
                Command::build("queue")
                    .aliases(&["q", "list_tracks"])
                    .run(|_| async { Ok(Reply::None) }),
            )
            .build()
    }

    fn guild_prefixes() -> Vec<String> {
        candidate_prefixes(99, Some("!"))
    }

    #[test]
    fn test_longest_name_wins() {
        let router = router();
        let matched = router.resolve("!playlist show foo", &guild_prefixes()).unwrap();
        assert_eq!(matched.command.name, "playlist show");
        assert_eq!(matched.raw_args, vec!["foo"]);

        let matched = router.resolve("!Playlist", &guild_prefixes()).unwrap();
        assert_eq!(matched.command.name, "playlist");
    }

    #[test]
    fn test_last_argument_is_greedy() {
        let router = router();
        let matched = router
            .resolve("!banuser <@5> spamming the   channel", &guild_prefixes())
            .unwrap();
        let args = matched.parse_args().unwrap();
        assert_eq!(args[0], Some(ArgValue::UserId(5)));
        assert_eq!(args[1], Some(ArgValue::Str("spamming the channel".into())));
    }

    #[test]
    fn test_missing_required_argument() {
        let router = router();
        let matched = router.resolve("!banuser <@5>", &guild_prefixes()).unwrap();
        let err = matched.parse_args().unwrap_err();
        assert_eq!(err.to_string(), "The required argument **reason** is missing.");
    }

    #[test]
    fn test_alias_underscores_are_stripped() {
        let router = router();
        let matched = router.resolve("!listtracks", &guild_prefixes()).unwrap();
        assert_eq!(matched.command.name, "queue");
        assert_eq!(matched.matched, "list_tracks");
        assert!(router.resolve("!list_tracks", &guild_prefixes()).is_none());
    }

    #[test]
    fn test_prefixes_by_context() {
        let guild = candidate_prefixes(99, Some("?"));
        assert_eq!(guild, vec!["?", "<@99>", "<@!99>"]);

        let dm = candidate_prefixes(99, None);
        assert_eq!(dm.len(), 2 + 94);
        assert!(dm.contains(&"$".to_string()));

        let router = router();
        assert!(router.resolve("!queue", &guild).is_none());
        assert!(router.resolve("<@!99> queue", &guild).is_some());
        assert!(router.resolve("$queue", &dm).is_some());
    }

    #[test]
    fn test_parse_builds_invocation() {
        let router = router();
        let message = Message {
            id: 1,
            channel_id: 2,
            guild_id: Some(3),
            author: User {
                id: 4,
                ..Default::default()
            },
            content: "!q".into(),
            member: None,
        };
        let invocation = router
            .parse(&message, &guild_prefixes(), Some("!".into()))
            .unwrap()
            .unwrap();
        assert_eq!(invocation.command.name, "queue");
        assert_eq!(invocation.prefix, "!");
        assert!(invocation.args.is_empty());
    }
}
