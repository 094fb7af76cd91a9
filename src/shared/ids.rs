use serde::{Deserialize, Serialize};

pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Identifiers are 1 to 64 ASCII letters, digits, `-` or `_`, starting with a
/// letter or digit.
pub fn validate_identifier_value(kind: &str, value: &str) -> Result<(), String> {
    let Some(first) = value.chars().next() else {
        return Err(format!("{kind} must be non-empty"));
    };
    if !first.is_ascii_alphanumeric() {
        return Err(format!("{kind} must start with a letter or digit"));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(format!("{kind} must be at most {MAX_IDENTIFIER_LEN} characters"));
    }
    match value
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_'))
    {
        Some(bad) => Err(format!("{kind} contains `{bad}`; only letters, digits, '-' and '_' are allowed")),
        None => Ok(()),
    }
}

macro_rules! define_id_type {
    ($name:ident, $kind:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: &str) -> Result<Self, String> {
                Self::try_from(raw.to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, String> {
                validate_identifier_value($kind, &value)
                    .map_err(|reason| format!("invalid {} `{}`: {}", $kind, value, reason))?;
                Ok(Self(value))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

// Group folders double as directory names under groups/, sessions/ and ipc/.
define_id_type!(GroupFolder, "group folder");
define_id_type!(TaskId, "task id");

impl TaskId {
    /// `task-<epoch_ms>-<8 hex chars>`.
    pub fn generate(now_ms: i64) -> Result<Self, getrandom::Error> {
        let mut bytes = [0u8; 4];
        getrandom::getrandom(&mut bytes)?;
        let suffix = bytes
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        Ok(Self(format!("task-{now_ms}-{suffix}")))
    }
}
