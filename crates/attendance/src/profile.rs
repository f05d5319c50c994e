use serde::{Deserialize, Serialize};

use presenca_core::{Entity, UserId};

/// Display attributes and schedule preferences supplied by the profile collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "id")]
    pub user_id: UserId,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub preferred_days: Vec<String>,
    #[serde(default)]
    pub preferred_times: Vec<String>,
}

impl UserProfile {
    pub fn new(user_id: UserId, full_name: impl Into<String>) -> Self {
        Self {
            user_id,
            full_name: Some(full_name.into()),
            avatar_url: None,
            preferred_days: Vec::new(),
            preferred_times: Vec::new(),
        }
    }
}

impl Entity for UserProfile {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.user_id
    }
}
