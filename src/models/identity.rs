use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Agent,
    Admin,
}

/// Who the push server should route events to. Sent in the `join` message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub user_type: UserType,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, user_type: UserType) -> Self {
        Self {
            user_id: user_id.into(),
            user_type,
        }
    }

    pub fn agent(user_id: impl Into<String>) -> Self {
        Self::new(user_id, UserType::Agent)
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(user_id, UserType::Admin)
    }
}
