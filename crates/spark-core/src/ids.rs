use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Process-generated identifier with a readable prefix.
macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        opaque_id_impls!($name);
    };
}

/// Identifier minted by a collaborator (identity provider, storage). Never generated here.
macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        opaque_id_impls!($name);
    };
}

macro_rules! opaque_id_impls {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(ConnectionId, "conn");
branded_id!(MessageId, "msg");
opaque_id!(UserId);
opaque_id!(WebsiteId);

impl WebsiteId {
    /// Parse a client-supplied website id. Websites are keyed by UUID in storage,
    /// so anything else is rejected before it reaches a collaborator.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(|u| Self(u.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn message_id_has_prefix() {
        let id = MessageId::new();
        assert!(id.as_str().starts_with("msg_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn user_id_is_transparent_in_json() {
        let id = UserId::from_raw("7b0e2c8a-user");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"7b0e2c8a-user\"");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn website_id_parse_accepts_uuid() {
        let raw = "0b9d6f0e-6a44-4c55-9a43-1f0c3f0e8e11";
        let id = WebsiteId::parse(raw).unwrap();
        assert_eq!(id.as_str(), raw);
    }

    #[test]
    fn website_id_parse_normalises_case() {
        let id = WebsiteId::parse("0B9D6F0E-6A44-4C55-9A43-1F0C3F0E8E11").unwrap();
        assert_eq!(id.as_str(), "0b9d6f0e-6a44-4c55-9a43-1f0c3f0e8e11");
    }

    #[test]
    fn website_id_parse_rejects_garbage() {
        assert!(WebsiteId::parse("not-a-uuid").is_none());
        assert!(WebsiteId::parse("").is_none());
    }
}
