use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::models::role::Role;

/// Named broadcast channel: `order-<id>`, `role-<role>` or `chat-<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Order(Uuid),
    Role(Role),
    Chat(String),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Order(id) => write!(f, "order-{id}"),
            Topic::Role(role) => write!(f, "role-{role}"),
            Topic::Chat(id) => write!(f, "chat-{id}"),
        }
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (kind, id) = raw
            .split_once('-')
            .ok_or_else(|| format!("malformed topic: {raw}"))?;

        match kind {
            "order" => Uuid::parse_str(id)
                .map(Topic::Order)
                .map_err(|err| format!("invalid order topic {raw}: {err}")),
            "role" => id.parse::<Role>().map(Topic::Role),
            "chat" if !id.is_empty() => Ok(Topic::Chat(id.to_string())),
            _ => Err(format!("unknown topic: {raw}")),
        }
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
