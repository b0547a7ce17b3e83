use serde::{Deserialize, Serialize};

use crate::{
    events::LogLevel,
    store::{DbCollectionIden, StoreIden},
};

#[derive(Default, Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Log {
    pub id: String,
    pub eid: String,
    pub nid: String,

    pub level: LogLevel,
    pub content: String,
    pub timestamp: i64,
}

impl DbCollectionIden for Log {
    fn iden() -> StoreIden {
        StoreIden::Logs
    }
}
