use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::AnnouncementError;

pub const DEFAULT_TITLE: &str = "New Announcement";
pub const ALL_SENTINEL: &str = "ALL";

/// Creation event as it arrives on the announcement queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncementCreated {
    pub id: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default)]
    pub target: Option<RawTarget>,
}

/// Loosely typed `target` field: `"ALL"`, a single role, or a list of roles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawTarget {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Roles(BTreeSet<String>),
}

impl Target {
    /// Builds a role filter, rejecting an empty role set.
    pub fn roles<I, S>(roles: I) -> Result<Self, AnnouncementError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: BTreeSet<String> = roles
            .into_iter()
            .map(Into::into)
            .filter(|role| !role.is_empty())
            .collect();

        if roles.is_empty() {
            return Err(AnnouncementError::EmptyTarget);
        }

        Ok(Target::Roles(roles))
    }

    pub fn matches(&self, role: Option<&str>) -> bool {
        match self {
            Target::All => true,
            Target::Roles(roles) => role.is_some_and(|role| roles.contains(role)),
        }
    }
}

impl TryFrom<Option<RawTarget>> for Target {
    type Error = AnnouncementError;

    fn try_from(raw: Option<RawTarget>) -> Result<Self, Self::Error> {
        match raw {
            None => Ok(Target::All),
            Some(RawTarget::One(value)) if value == ALL_SENTINEL => Ok(Target::All),
            Some(RawTarget::One(value)) => Target::roles([value]),
            Some(RawTarget::Many(values)) => Target::roles(values),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub id: String,
    pub title: String,
    pub body: String,
    pub target: Target,
}

impl TryFrom<AnnouncementCreated> for Announcement {
    type Error = AnnouncementError;

    fn try_from(event: AnnouncementCreated) -> Result<Self, Self::Error> {
        if event.id.trim().is_empty() {
            return Err(AnnouncementError::MissingId);
        }

        let title = event
            .title
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());

        Ok(Self {
            id: event.id,
            title,
            body: event.body.unwrap_or_default(),
            target: Target::try_from(event.target)?,
        })
    }
}

impl Announcement {
    pub fn from_json(payload: &[u8]) -> Result<Self, AnnouncementError> {
        let event = serde_json::from_slice::<AnnouncementCreated>(payload)?;
        Self::try_from(event)
    }
}
