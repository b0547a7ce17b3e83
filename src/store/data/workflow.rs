use serde::{Deserialize, Serialize};

use crate::store::{DbCollectionIden, StoreIden};

/// A deployed workflow definition; `data` holds the JSON model.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub desc: String,
    pub version: u32,
    pub data: String,
    pub create_time: i64,
    pub update_time: i64,
}

impl DbCollectionIden for Workflow {
    fn iden() -> StoreIden {
        StoreIden::Workflows
    }
}
