use serde::{Deserialize, Serialize};

/// Geographic administrative zone incidents are attributed to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct Delegation {
    pub id: i64,

    #[serde(rename = "nombre")]
    #[sqlx(rename = "nombre")]
    pub name: String,
}

impl Delegation {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}
