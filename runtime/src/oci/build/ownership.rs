//! Ownership and permission resolution for `--chown` / `--chmod`.
//!
//! User and group names are resolved through a [`UserLookup`] strategy
//! handed to the executor at construction. The default strategy reads
//! `etc/passwd` and `etc/group` under the filesystem being built.

use std::path::{Path, PathBuf};

use strata_core::error::{Result, StrataError};

use super::expand::expand;

/// Largest mode `--chmod` accepts.
const MAX_CHMOD: u32 = 0o7777;

/// Resolved owner for every file one instruction produces.
///
/// `None` means unspecified: copied files keep their source owner and
/// newly created content keeps the owner of the building process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ownership {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl Ownership {
    /// Leave ownership untouched.
    pub const UNSPECIFIED: Ownership = Ownership {
        uid: None,
        gid: None,
    };

    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid: Some(uid),
            gid: Some(gid),
        }
    }

    pub fn is_unspecified(&self) -> bool {
        self.uid.is_none() && self.gid.is_none()
    }
}

/// An account entry found by a [`UserLookup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserEntry {
    pub uid: u32,
    /// Primary group
    pub gid: u32,
}

/// Resolves user and group names to numeric ids.
pub trait UserLookup: Send + Sync {
    /// Look up a user by name or numeric id string.
    fn lookup_user(&self, user: &str) -> Result<Option<UserEntry>>;

    /// Look up a group by name or numeric id string.
    fn lookup_group(&self, group: &str) -> Result<Option<u32>>;
}

/// Reads `etc/passwd` and `etc/group` below a root directory.
#[derive(Debug, Clone)]
pub struct EtcPasswdLookup {
    root: PathBuf,
}

impl EtcPasswdLookup {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_db(&self, name: &str) -> Result<String> {
        let path = self.root.join("etc").join(name);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(StrataError::io_at("reading", &path, e)),
        }
    }
}

impl UserLookup for EtcPasswdLookup {
    fn lookup_user(&self, user: &str) -> Result<Option<UserEntry>> {
        // name:password:uid:gid:gecos:home:shell
        let passwd = self.read_db("passwd")?;
        Ok(passwd
            .lines()
            .filter(|l| !l.trim_start().starts_with('#'))
            .filter_map(|line| {
                let fields: Vec<&str> = line.split(':').collect();
                let uid = fields.get(2)?.parse().ok()?;
                let gid = fields.get(3)?.parse().ok()?;
                Some((fields[0], fields[2], UserEntry { uid, gid }))
            })
            .find(|(name, uid, _)| *name == user || *uid == user)
            .map(|(_, _, entry)| entry))
    }

    fn lookup_group(&self, group: &str) -> Result<Option<u32>> {
        // name:password:gid:members
        let groups = self.read_db("group")?;
        Ok(groups
            .lines()
            .filter(|l| !l.trim_start().starts_with('#'))
            .filter_map(|line| {
                let fields: Vec<&str> = line.split(':').collect();
                let gid: u32 = fields.get(2)?.parse().ok()?;
                Some((fields[0], fields[2], gid))
            })
            .find(|(name, gid, _)| *name == group || *gid == group)
            .map(|(_, _, gid)| gid))
    }
}

/// Ownership for `--chown` alone: empty means unspecified.
///
/// Used for copies from another stage, whose files do not belong to
/// this image's default user.
pub fn get_user_group(
    chown: Option<&str>,
    env: &[(String, String)],
    lookup: &dyn UserLookup,
) -> Result<Ownership> {
    match chown.filter(|c| !c.is_empty()) {
        None => Ok(Ownership::UNSPECIFIED),
        Some(spec) => {
            let spec = expand(spec, env, false)?;
            ownership_from_spec(&spec, lookup)
        }
    }
}

/// Ownership for `--chown`, falling back to the image's configured user.
pub fn get_active_user_group(
    config_user: &str,
    chown: Option<&str>,
    env: &[(String, String)],
    lookup: &dyn UserLookup,
) -> Result<Ownership> {
    let spec = match chown.filter(|c| !c.is_empty()) {
        Some(chown) => chown,
        None => config_user,
    };
    if spec.is_empty() {
        return Ok(Ownership::UNSPECIFIED);
    }
    let spec = expand(spec, env, false)?;
    ownership_from_spec(&spec, lookup)
}

/// Resolve `user[:group]` to numeric ids.
///
/// Without a group the user's primary group is used, or the uid itself
/// for a numeric user that has no account entry.
pub fn ownership_from_spec(spec: &str, lookup: &dyn UserLookup) -> Result<Ownership> {
    let mut parts = spec.splitn(3, ':');
    let user = parts.next().unwrap_or_default();
    let group = parts.next();
    if parts.next().is_some() || user.is_empty() {
        return Err(StrataError::Resolution(format!(
            "invalid chown spec '{}': expected user[:group]",
            spec
        )));
    }

    let (uid, primary_gid) = match lookup.lookup_user(user)? {
        Some(entry) => (entry.uid, Some(entry.gid)),
        None => {
            let uid = user.parse::<u32>().map_err(|_| {
                StrataError::Resolution(format!("user '{}' not found in /etc/passwd", user))
            })?;
            (uid, None)
        }
    };

    let gid = match group {
        Some(group) if !group.is_empty() => match lookup.lookup_group(group)? {
            Some(gid) => gid,
            None => group.parse::<u32>().map_err(|_| {
                StrataError::Resolution(format!("group '{}' not found in /etc/group", group))
            })?,
        },
        _ => primary_gid.unwrap_or(uid),
    };

    Ok(Ownership::new(uid, gid))
}

/// Parse `--chmod`: `None` keeps the default permissions.
pub fn get_chmod(chmod: Option<&str>, env: &[(String, String)]) -> Result<Option<u32>> {
    let Some(chmod) = chmod.filter(|c| !c.is_empty()) else {
        return Ok(None);
    };
    let chmod = expand(chmod, env, false)?;
    let mode = u32::from_str_radix(&chmod, 8).map_err(|e| {
        StrataError::Resolution(format!("invalid chmod '{}': {}", chmod, e))
    })?;
    if mode > MAX_CHMOD {
        return Err(StrataError::Resolution(format!(
            "invalid chmod '{}': mode out of range",
            chmod
        )));
    }
    Ok(Some(mode))
}

/// Apply ownership to `path` without following a final symlink.
///
/// Unspecified ids keep the current owner. Nothing is changed when the
/// owner already matches.
pub fn apply_ownership(path: &Path, ownership: Ownership, current: (u32, u32)) -> Result<()> {
    let uid = ownership.uid.unwrap_or(current.0);
    let gid = ownership.gid.unwrap_or(current.1);
    if (uid, gid) == current {
        return Ok(());
    }
    std::os::unix::fs::lchown(path, Some(uid), Some(gid))
        .map_err(|e| StrataError::io_at("changing owner of", path, e))
}
