use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Iris code given to content that is visible in every neighborhood.
pub const ALL_IRIS: &str = "all";

/// Picture assigned to accounts that never uploaded one.
pub const DEFAULT_PROFILE_PICTURE: &str = "/uploads/profile/default.png";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
        }
    }

    /// Moderators and admins.
    pub fn is_staff(&self) -> bool {
        matches!(self, Self::Moderator | Self::Admin)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "moderator" => Ok(Self::Moderator),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

// -- JWT Claims --

/// Access token claims. Shared by the REST middleware and the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub exp: usize,
}

// -- Users --

/// Public view of an account. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub date_of_birth: NaiveDate,
    pub profile_picture: String,
    pub role: Role,
    pub address: Option<String>,
    pub iris_code: String,
    pub iris_name: String,
    pub points: i64,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.firstname, self.lastname)
    }

    /// Admins see every neighborhood; everyone else only their own and `all`.
    pub fn can_see_iris(&self, iris_code: &str) -> bool {
        self.role.is_admin() || iris_code == ALL_IRIS || iris_code == self.iris_code
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub firstname: String,
    pub lastname: String,
    pub profile_picture: String,
}

// -- Enumerations stored as text --

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

text_enum!(PollType {
    Single => "single",
    Multiple => "multiple",
    Limited => "limited",
});

text_enum!(NewsStatus {
    Pending => "PENDING",
    Approved => "APPROVED",
    Rejected => "REJECTED",
});

text_enum!(ReportStatus {
    Pending => "PENDING",
    Validated => "VALIDATED",
    Rejected => "REJECTED",
});

text_enum!(InviteStatus {
    Pending => "pending",
    Accepted => "accepted",
    Declined => "declined",
});

text_enum!(HangmanRole {
    Giver => "giver",
    Guesser => "guesser",
});

text_enum!(CompletionStatus {
    Pending => "PENDING",
    Validated => "VALIDATED",
    Rejected => "REJECTED",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_and_staff() {
        assert_eq!("moderator".parse::<Role>().unwrap(), Role::Moderator);
        assert!("root".parse::<Role>().is_err());
        assert!(Role::Admin.is_staff());
        assert!(Role::Moderator.is_staff());
        assert!(!Role::User.is_staff());
        assert!(!Role::Moderator.is_admin());
    }

    #[test]
    fn text_enums_use_wire_spelling() {
        assert_eq!(serde_json::to_string(&PollType::Limited).unwrap(), "\"limited\"");
        assert_eq!(serde_json::to_string(&NewsStatus::Approved).unwrap(), "\"APPROVED\"");
        assert_eq!("declined".parse::<InviteStatus>().unwrap(), InviteStatus::Declined);
        assert!("DONE".parse::<ReportStatus>().is_err());
    }
}
