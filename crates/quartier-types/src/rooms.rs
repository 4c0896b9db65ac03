use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

/// A chat room name.
///
/// `general` is open to everyone, `group-<uuid>` to the group's members and
/// `private-<a>_<b>` to exactly two users. Private rooms always store the
/// smaller id first so both participants end up in the same room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    General,
    Group(Uuid),
    Private(Uuid, Uuid),
}

impl Room {
    pub fn private(a: Uuid, b: Uuid) -> Self {
        if a <= b { Self::Private(a, b) } else { Self::Private(b, a) }
    }

    /// Membership for rooms that can be decided without storage. Group rooms
    /// return `None` and must be checked against the member list.
    pub fn admits(&self, user_id: Uuid) -> Option<bool> {
        match self {
            Self::General => Some(true),
            Self::Private(a, b) => Some(*a == user_id || *b == user_id),
            Self::Group(_) => None,
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::General => f.write_str("general"),
            Self::Group(id) => write!(f, "group-{}", id),
            Self::Private(a, b) => write!(f, "private-{}_{}", a, b),
        }
    }
}

impl FromStr for Room {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "general" {
            return Ok(Self::General);
        }
        if let Some(id) = s.strip_prefix("group-") {
            return id
                .parse()
                .map(Self::Group)
                .map_err(|_| format!("invalid group room '{}'", s));
        }
        if let Some(pair) = s.strip_prefix("private-") {
            let (a, b) = pair
                .split_once('_')
                .ok_or_else(|| format!("invalid private room '{}'", s))?;
            let a: Uuid = a.parse().map_err(|_| format!("invalid private room '{}'", s))?;
            let b: Uuid = b.parse().map_err(|_| format!("invalid private room '{}'", s))?;
            if a == b {
                return Err(format!("invalid private room '{}'", s));
            }
            return Ok(Self::private(a, b));
        }
        Err(format!("unknown room '{}'", s))
    }
}
