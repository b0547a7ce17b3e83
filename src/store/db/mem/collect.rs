use std::{cmp::Ordering, sync::RwLock};

use serde_json::Value as JsonValue;

use super::DbDocument;
use crate::{
    NodeflowError, Result,
    store::{DbCollection, PageData, map_db_err, query::Query},
};

/// An in-memory collection kept in insertion order.
#[derive(Debug)]
pub struct Collect<T> {
    name: String,
    items: RwLock<Vec<T>>,
}

impl<T> Collect<T> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            items: RwLock::new(Vec::new()),
        }
    }
}

fn cmp_json(
    a: Option<&JsonValue>,
    b: Option<&JsonValue>,
) -> Ordering {
    match (a, b) {
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal),
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

impl<T> DbCollection for Collect<T>
where
    T: DbDocument + Clone + Send + Sync,
{
    type Item = T;

    fn exists(
        &self,
        id: &str,
    ) -> Result<bool> {
        let items = self.items.read().map_err(map_db_err)?;
        Ok(items.iter().any(|item| item.id() == id))
    }

    fn find(
        &self,
        id: &str,
    ) -> Result<Self::Item> {
        let items = self.items.read().map_err(map_db_err)?;
        items
            .iter()
            .find(|item| item.id() == id)
            .cloned()
            .ok_or_else(|| NodeflowError::Store(format!("{}: record '{}' not found", self.name, id)))
    }

    fn query(
        &self,
        q: &Query,
    ) -> Result<PageData<Self::Item>> {
        let items = self.items.read().map_err(map_db_err)?;

        let mut matched = Vec::new();
        for item in items.iter() {
            let doc = item.doc()?;
            if q.filters().iter().all(|(key, value)| doc.get(key) == Some(value)) {
                matched.push((doc, item));
            }
        }

        if !q.order_by().is_empty() {
            matched.sort_by(|(a, _), (b, _)| {
                for (key, rev) in q.order_by() {
                    let ord = cmp_json(a.get(key), b.get(key));
                    let ord = if *rev { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let count = matched.len();
        let rows = matched.into_iter().skip(q.offset()).take(q.limit()).map(|(_, item)| item.clone()).collect();

        Ok(PageData {
            count,
            page_num: q.offset() / q.limit() + 1,
            page_count: count.div_ceil(q.limit()),
            page_size: q.limit(),
            rows,
        })
    }

    fn create(
        &self,
        data: &Self::Item,
    ) -> Result<bool> {
        let mut items = self.items.write().map_err(map_db_err)?;
        if items.iter().any(|item| item.id() == data.id()) {
            return Err(NodeflowError::Store(format!("{}: record '{}' already exists", self.name, data.id())));
        }
        items.push(data.clone());
        Ok(true)
    }

    fn update(
        &self,
        data: &Self::Item,
    ) -> Result<bool> {
        let mut items = self.items.write().map_err(map_db_err)?;
        match items.iter_mut().find(|item| item.id() == data.id()) {
            Some(item) => {
                *item = data.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(
        &self,
        id: &str,
    ) -> Result<bool> {
        let mut items = self.items.write().map_err(map_db_err)?;
        let before = items.len();
        items.retain(|item| item.id() != id);
        Ok(items.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{events::LogLevel, store::data::Log};

    fn log(
        id: &str,
        eid: &str,
        timestamp: i64,
    ) -> Log {
        Log {
            id: id.to_string(),
            eid: eid.to_string(),
            nid: "n1".to_string(),
            level: LogLevel::Info,
            content: format!("line {}", id),
            timestamp,
        }
    }

    #[test]
    fn test_crud() {
        let logs = Collect::<Log>::new("logs");
        assert!(logs.create(&log("1", "e1", 10)).unwrap());
        assert!(logs.create(&log("1", "e1", 10)).is_err());
        assert!(logs.exists("1").unwrap());

        let mut changed = log("1", "e1", 10);
        changed.content = "changed".to_string();
        assert!(logs.update(&changed).unwrap());
        assert_eq!(logs.find("1").unwrap().content, "changed");
        assert!(!logs.update(&log("2", "e1", 1)).unwrap());

        assert!(logs.delete("1").unwrap());
        assert!(logs.find("1").is_err());
    }

    #[test]
    fn test_query_filter_order_page() {
        let logs = Collect::<Log>::new("logs");
        for (i, eid) in ["e1", "e2", "e1", "e1", "e2"].iter().enumerate() {
            logs.create(&log(&i.to_string(), eid, i as i64)).unwrap();
        }

        let page = logs.query(&Query::new().filter("eid", "e1").order("timestamp", true).set_limit(2)).unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.page_count, 2);
        assert_eq!(page.rows.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(), vec!["3", "2"]);

        let page = logs.query(&Query::new().filter("eid", "e1").order("timestamp", true).set_limit(2).set_offset(2)).unwrap();
        assert_eq!(page.page_num, 2);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].id, "0");
    }
}
