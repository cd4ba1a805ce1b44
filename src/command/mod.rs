//! Command definitions
//!
//! A command is a name, its aliases, typed argument specs, permission
//! requirements and an async callback. Commands are registered once into a
//! [`Router`] that is frozen for the life of the process.

pub mod args;
pub mod exec;
pub mod router;

pub use router::{candidate_prefixes, Matched, Router, RouterBuilder};

use crate::api::{ApiClient, ApiError};
use crate::coordinator::Coordinator;
use crate::discord::DiscordError;
use crate::kv::{KvError, KEY_BOT_ADMINS, KEY_BOT_OWNERS};
use crate::models::{Embed, Message, User};
use crate::relay::RelayError;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("The required argument **{0}** is missing.")]
    MissingArgument(String),

    #[error("The argument **{name}** must be {kind}.")]
    InvalidArgument { name: String, kind: &'static str },

    #[error("This command can only be used in a server.")]
    GuildOnly,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Discord(#[from] DiscordError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Kv(#[from] KvError),
}

impl CommandError {
    /// Errors the user caused and should see.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CommandError::MissingArgument(_) | CommandError::InvalidArgument { .. } | CommandError::GuildOnly
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Integer,
    Boolean,
    Duration,
    User,
}

impl ArgKind {
    /// Phrase used in validation messages.
    pub fn describe(&self) -> &'static str {
        match self {
            ArgKind::String => "a string",
            ArgKind::Integer => "an integer",
            ArgKind::Boolean => "a boolean",
            ArgKind::Duration => "a duration",
            ArgKind::User => "a user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
}

impl ArgSpec {
    pub fn required(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub fn optional(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Duration(Duration),
    /// Mention as parsed; replaced by `User` once resolved.
    UserId(u64),
    User(User),
}

/// Who may run a command. Membership lives in key-value sets rebuilt from the
/// main guild's roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    BotAdmin,
    BotOwner,
}

impl Requirement {
    pub async fn check(&self, coordinator: &Coordinator, user: &User) -> Result<bool, KvError> {
        let key = match self {
            Requirement::BotAdmin => KEY_BOT_ADMINS,
            Requirement::BotOwner => KEY_BOT_OWNERS,
        };
        coordinator.kv.is_member(key, &user.id.to_string()).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    General,
    Music,
    Player,
    Queue,
    Playlist,
    Admin,
    Owner,
}

impl Category {
    pub fn title(&self) -> &'static str {
        match self {
            Category::General => "General",
            Category::Music => "Music",
            Category::Player => "Player",
            Category::Queue => "Queue",
            Category::Playlist => "Playlist",
            Category::Admin => "Admin",
            Category::Owner => "Owner",
        }
    }
}

/// What a command answers with.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Wrapped in an embed titled after the command.
    Text(String),
    Embed(Embed),
    None,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Reply::Text(content.into())
    }

    pub fn error(content: impl Into<String>) -> Self {
        Reply::Embed(Embed::error(content))
    }
}

pub type CommandResult = Result<Reply, CommandError>;

pub type CommandFn = Arc<dyn Fn(CommandContext) -> BoxFuture<'static, CommandResult> + Send + Sync>;

pub struct Command {
    pub name: &'static str,
    pub aliases: Vec<&'static str>,
    pub args: Vec<ArgSpec>,
    pub requirements: Vec<Requirement>,
    pub allow_dm: bool,
    pub disabled: bool,
    pub description: &'static str,
    pub category: Category,
    run: CommandFn,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl Command {
    pub fn build(name: &'static str) -> CommandBuilder {
        CommandBuilder {
            name,
            aliases: Vec::new(),
            args: Vec::new(),
            requirements: Vec::new(),
            allow_dm: false,
            disabled: false,
            description: "",
            category: Category::General,
        }
    }

    pub fn call(&self, ctx: CommandContext) -> BoxFuture<'static, CommandResult> {
        (self.run)(ctx)
    }

    /// Usage line, e.g. `playlist show <name>`.
    pub fn usage(&self) -> String {
        let mut usage = self.name.to_string();
        for arg in &self.args {
            if arg.required {
                usage.push_str(&format!(" <{}>", arg.name));
            } else {
                usage.push_str(&format!(" [{}]", arg.name));
            }
        }
        usage
    }

    /// Reply title: underscores to spaces, each word capitalised.
    pub fn title(&self) -> String {
        self.name
            .replace('_', " ")
            .split(' ')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join(" ")
    }
}

pub struct CommandBuilder {
    name: &'static str,
    aliases: Vec<&'static str>,
    args: Vec<ArgSpec>,
    requirements: Vec<Requirement>,
    allow_dm: bool,
    disabled: bool,
    description: &'static str,
    category: Category,
}

impl CommandBuilder {
    pub fn aliases(mut self, aliases: &[&'static str]) -> Self {
        self.aliases.extend_from_slice(aliases);
        self
    }

    pub fn arg(mut self, spec: ArgSpec) -> Self {
        self.args.push(spec);
        self
    }

    pub fn require(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn allow_dm(mut self) -> Self {
        self.allow_dm = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn run<F, Fut>(self, f: F) -> Command
    where
        F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        Command {
            name: self.name,
            aliases: self.aliases,
            args: self.args,
            requirements: self.requirements,
            allow_dm: self.allow_dm,
            disabled: self.disabled,
            description: self.description,
            category: self.category,
            run: Arc::new(move |ctx| Box::pin(f(ctx))),
        }
    }
}

/// Resolved command plus everything about the message that triggered it.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: Arc<Command>,
    pub prefix: String,
    pub guild_prefix: Option<String>,
    pub args: Vec<Option<ArgValue>>,
    pub message: Message,
}

/// Handed to command callbacks.
pub struct CommandContext {
    pub coordinator: Arc<Coordinator>,
    pub invocation: Invocation,
}

impl CommandContext {
    pub fn author(&self) -> &User {
        &self.invocation.message.author
    }

    pub fn channel_id(&self) -> u64 {
        self.invocation.message.channel_id
    }

    pub fn guild_id(&self) -> Result<u64, CommandError> {
        self.invocation.message.guild_id.ok_or(CommandError::GuildOnly)
    }

    pub fn api(&self) -> &ApiClient {
        &self.coordinator.api
    }

    pub fn arg(&self, index: usize) -> Option<&ArgValue> {
        self.invocation.args.get(index).and_then(Option::as_ref)
    }

    fn missing(&self, index: usize) -> CommandError {
        let name = self
            .invocation
            .command
            .args
            .get(index)
            .map_or("argument", |a| a.name);
        CommandError::MissingArgument(name.to_string())
    }

    pub fn str_arg(&self, index: usize) -> Option<&str> {
        match self.arg(index) {
            Some(ArgValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn required_str(&self, index: usize) -> Result<&str, CommandError> {
        self.str_arg(index).ok_or_else(|| self.missing(index))
    }

    pub fn int_arg(&self, index: usize) -> Option<i64> {
        match self.arg(index) {
            Some(ArgValue::Int(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn required_int(&self, index: usize) -> Result<i64, CommandError> {
        match self.arg(index) {
            Some(ArgValue::Int(n)) => Ok(*n),
            _ => Err(self.missing(index)),
        }
    }

    pub fn bool_arg(&self, index: usize) -> Option<bool> {
        match self.arg(index) {
            Some(ArgValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn required_duration(&self, index: usize) -> Result<Duration, CommandError> {
        match self.arg(index) {
            Some(ArgValue::Duration(d)) => Ok(*d),
            _ => Err(self.missing(index)),
        }
    }

    /// Duration argument in milliseconds, rejected when it overflows `i64`.
    pub fn required_millis(&self, index: usize) -> Result<i64, CommandError> {
        let duration = self.required_duration(index)?;
        i64::try_from(duration.as_millis()).map_err(|_| CommandError::InvalidArgument {
            name: self
                .invocation
                .command
                .args
                .get(index)
                .map_or("argument", |a| a.name)
                .to_string(),
            kind: ArgKind::Duration.describe(),
        })
    }

    pub fn required_user(&self, index: usize) -> Result<&User, CommandError> {
        match self.arg(index) {
            Some(ArgValue::User(u)) => Ok(u),
            _ => Err(self.missing(index)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &'static str) -> CommandBuilder {
        Command::build(name)
    }

    #[test]
    fn test_title_case() {
        let cmd = noop("ban_user").run(|_| async { Ok(Reply::None) });
        assert_eq!(cmd.title(), "Ban User");
        let cmd = noop("playlist show").run(|_| async { Ok(Reply::None) });
        assert_eq!(cmd.title(), "Playlist Show");
    }

    #[test]
    fn test_usage() {
        let cmd = noop("move")
            .arg(ArgSpec::required("item", ArgKind::Integer))
            .arg(ArgSpec::optional("position", ArgKind::Integer))
            .run(|_| async { Ok(Reply::None) });
        assert_eq!(cmd.usage(), "move <item> [position]");
    }

    #[test]
    fn test_validation_messages() {
        assert_eq!(
            CommandError::MissingArgument("reason".into()).to_string(),
            "The required argument **reason** is missing."
        );
        assert_eq!(
            CommandError::InvalidArgument {
                name: "amount".into(),
                kind: ArgKind::Duration.describe(),
            }
            .to_string(),
            "The argument **amount** must be a duration."
        );
    }
}
