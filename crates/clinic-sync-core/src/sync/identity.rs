//! Identity collaborator. Token acquisition lives outside this crate.

use serde::{Deserialize, Serialize};

/// The signed-in account (a doctor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub entitlements: Vec<String>,
}

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entitlements: Vec::new(),
        }
    }
}

/// Supplies the current bearer token and account.
///
/// Read fresh on every mutation and every sync cycle; never cached.
pub trait IdentityProvider: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn current_account(&self) -> Option<Account>;
}
