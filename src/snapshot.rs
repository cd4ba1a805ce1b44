//! Roster snapshots
//!
//! On shutdown the roster is written to disk so a restarted process does not
//! announce every cached guild as newly joined. Only identity fields persist:
//! voice states and presence are rebuilt from the gateway.
//!
//! File format: postcard-encoded [`Snapshot`]. Writes go to `<path>.tmp`,
//! are synced, then renamed over `<path>`.

use crate::roster::{GuildState, Roster};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

pub const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Snapshot encoding failed: {0}")]
    Encode(#[source] postcard::Error),

    #[error("Snapshot {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: postcard::Error,
    },

    #[error("Snapshot {path} has unsupported version {found}")]
    Version { path: PathBuf, found: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: u64,
    pub name: String,
    pub color: u32,
    pub position: i64,
    pub permissions: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverwriteRecord {
    pub id: u64,
    pub kind: u8,
    pub allow: u64,
    pub deny: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: u64,
    pub name: Option<String>,
    pub kind: u8,
    pub position: i64,
    pub parent_id: Option<u64>,
    pub overwrites: Vec<OverwriteRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: u64,
    pub username: String,
    pub discriminator: String,
    pub avatar: Option<String>,
    pub bot: bool,
    pub nick: Option<String>,
    pub roles: Vec<u64>,
    pub joined_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildRecord {
    pub id: u64,
    pub name: String,
    pub icon: Option<String>,
    pub owner_id: u64,
    pub region: Option<String>,
    pub member_count: u64,
    /// READY placeholder whose GUILD_CREATE has not arrived yet.
    pub unavailable: bool,
    pub roles: Vec<RoleRecord>,
    pub channels: Vec<ChannelRecord>,
    pub members: Vec<MemberRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub taken_at: i64,
    pub guilds: Vec<GuildRecord>,
}

impl From<&GuildState> for GuildRecord {
    fn from(g: &GuildState) -> Self {
        Self {
            id: g.id,
            name: g.name.clone(),
            icon: g.icon.clone(),
            owner_id: g.owner_id,
            region: g.region.clone(),
            member_count: g.member_count,
            unavailable: g.unavailable,
            roles: g
                .roles
                .values()
                .map(|r| RoleRecord {
                    id: r.id,
                    name: r.name.clone(),
                    color: r.color,
                    position: r.position,
                    permissions: r.permissions,
                })
                .collect(),
            channels: g
                .channels
                .values()
                .map(|c| ChannelRecord {
                    id: c.id,
                    name: c.name.clone(),
                    kind: c.kind,
                    position: c.position,
                    parent_id: c.parent_id,
                    overwrites: c
                        .permission_overwrites
                        .iter()
                        .map(|o| OverwriteRecord {
                            id: o.id,
                            kind: o.kind,
                            allow: o.allow,
                            deny: o.deny,
                        })
                        .collect(),
                })
                .collect(),
            members: g
                .members
                .values()
                .map(|m| MemberRecord {
                    id: m.user.id,
                    username: m.user.username.clone(),
                    discriminator: m.user.discriminator.clone(),
                    avatar: m.user.avatar.clone(),
                    bot: m.user.bot,
                    nick: m.nick.clone(),
                    roles: m.roles.clone(),
                    joined_at: m.joined_at.clone(),
                })
                .collect(),
        }
    }
}

impl From<GuildRecord> for GuildState {
    fn from(r: GuildRecord) -> Self {
        use crate::models::{Channel, Member, Overwrite, Role, User};

        Self {
            id: r.id,
            name: r.name,
            icon: r.icon,
            owner_id: r.owner_id,
            region: r.region,
            member_count: r.member_count,
            unavailable: r.unavailable,
            roles: r
                .roles
                .into_iter()
                .map(|role| {
                    let role = Role {
                        id: role.id,
                        name: role.name,
                        color: role.color,
                        position: role.position,
                        permissions: role.permissions,
                    };
                    (role.id, role)
                })
                .collect(),
            channels: r
                .channels
                .into_iter()
                .map(|c| {
                    let channel = Channel {
                        id: c.id,
                        guild_id: Some(r.id),
                        name: c.name,
                        kind: c.kind,
                        position: c.position,
                        parent_id: c.parent_id,
                        permission_overwrites: c
                            .overwrites
                            .into_iter()
                            .map(|o| Overwrite {
                                id: o.id,
                                kind: o.kind,
                                allow: o.allow,
                                deny: o.deny,
                            })
                            .collect(),
                    };
                    (channel.id, channel)
                })
                .collect(),
            members: r
                .members
                .into_iter()
                .map(|m| {
                    let member = Member {
                        user: User {
                            id: m.id,
                            username: m.username,
                            discriminator: m.discriminator,
                            avatar: m.avatar,
                            bot: m.bot,
                        },
                        nick: m.nick,
                        roles: m.roles,
                        joined_at: m.joined_at,
                    };
                    (m.id, member)
                })
                .collect(),
            voice_states: Default::default(),
        }
    }
}

impl Snapshot {
    /// Copy the roster, one guild read lock at a time.
    pub fn capture(roster: &Roster) -> Self {
        let guilds = roster
            .handles()
            .iter()
            .map(|handle| GuildRecord::from(&*handle.read()))
            .collect();

        Self {
            version: SNAPSHOT_VERSION,
            taken_at: chrono::Utc::now().timestamp(),
            guilds,
        }
    }

    /// Load every guild into the roster.
    pub fn restore(self, roster: &Roster) -> usize {
        let count = self.guilds.len();
        for record in self.guilds {
            roster.insert_guild(GuildState::from(record));
        }
        count
    }

    pub fn member_count(&self) -> usize {
        self.guilds.iter().map(|g| g.members.len()).sum()
    }
}

/// Snapshot file at a fixed path.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Write the roster atomically.
    pub async fn save(&self, roster: &Roster) -> Result<Snapshot, SnapshotError> {
        let snapshot = Snapshot::capture(roster);
        let bytes = postcard::to_allocvec(&snapshot).map_err(SnapshotError::Encode)?;

        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;

        info!(
            path = %self.path.display(),
            guilds = snapshot.guilds.len(),
            members = snapshot.member_count(),
            bytes = bytes.len(),
            "Wrote roster snapshot"
        );
        Ok(snapshot)
    }

    /// Read the snapshot. `Ok(None)` when no file exists.
    pub async fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "No roster snapshot, starting cold");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot =
            postcard::from_bytes(&bytes).map_err(|source| SnapshotError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version {
                path: self.path.clone(),
                found: snapshot.version,
            });
        }

        Ok(Some(snapshot))
    }

    /// Load and apply to the roster. Returns the number of restored guilds.
    pub async fn restore_into(&self, roster: &Roster) -> Result<usize, SnapshotError> {
        match self.load().await? {
            Some(snapshot) => {
                let members = snapshot.member_count();
                let guilds = snapshot.restore(roster);
                info!(guilds, members, "Restored roster snapshot");
                Ok(guilds)
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tmp_path_appends_suffix() {
        let store = SnapshotStore::new("/var/lib/chorus/cache.db");
        assert_eq!(store.tmp_path(), PathBuf::from("/var/lib/chorus/cache.db.tmp"));
    }

    #[tokio::test]
    async fn test_missing_file_is_cold_start() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("absent.db"));
        assert!(store.load().await.unwrap().is_none());

        let roster = Roster::new();
        assert_eq!(store.restore_into(&roster).await.unwrap(), 0);
        assert!(roster.is_empty());
    }

    #[tokio::test]
    async fn test_garbage_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        std::fs::write(&path, [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap();

        let err = SnapshotStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_empty_roster_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("cache.db"));
        store.save(&Roster::new()).await.unwrap();

        assert!(!store.tmp_path().exists());
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.version, SNAPSHOT_VERSION);
        assert!(loaded.guilds.is_empty());
    }
}
