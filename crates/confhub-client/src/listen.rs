//! Change listeners.
//!
//! A listener registered under the empty key hears every change; keyed
//! listeners hear only their key. Both fire for a keyed change.

use std::sync::Arc;

use dashmap::DashMap;

use crate::table::Change;

pub type Listener = Arc<dyn Fn(&Change) + Send + Sync>;

/// Key under which global listeners are stored.
pub const ALL_KEYS: &str = "";

#[derive(Default)]
pub struct ListenerSet {
    by_key: DashMap<String, Vec<Listener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: &str, listener: Listener) {
        self.by_key.entry(key.to_string()).or_default().push(listener);
    }

    /// Call every matching listener for each change, in order.
    pub fn fire(&self, changes: &[Change]) {
        if changes.is_empty() {
            return;
        }
        let global = self.matching(ALL_KEYS);
        for change in changes {
            for listener in self.matching(&change.key).iter().chain(global.iter()) {
                listener(change);
            }
        }
    }

    fn matching(&self, key: &str) -> Vec<Listener> {
        self.by_key.get(key).map(|l| l.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confhub_core::OpType;
    use std::sync::Mutex;

    fn change(key: &str) -> Change {
        Change {
            key: key.to_string(),
            op: OpType::Create,
            old_value: None,
            new_value: Some("1".to_string()),
        }
    }

    #[test]
    fn global_and_keyed_listeners_both_fire() {
        let heard = Arc::new(Mutex::new(Vec::new()));
        let set = ListenerSet::new();
        {
            let heard = heard.clone();
            set.add("timeout", Arc::new(move |c: &Change| {
                heard.lock().unwrap().push(format!("key:{}", c.key));
            }));
        }
        {
            let heard = heard.clone();
            set.add(ALL_KEYS, Arc::new(move |c: &Change| {
                heard.lock().unwrap().push(format!("all:{}", c.key));
            }));
        }

        set.fire(&[change("timeout"), change("retries")]);
        assert_eq!(
            *heard.lock().unwrap(),
            vec!["key:timeout", "all:timeout", "all:retries"]
        );
    }

    #[test]
    fn listener_may_register_another_listener() {
        let set = Arc::new(ListenerSet::new());
        {
            let inner = set.clone();
            set.add("a", Arc::new(move |_: &Change| {
                inner.add("b", Arc::new(|_: &Change| {}));
            }));
        }
        set.fire(&[change("a")]);
        assert_eq!(set.matching("b").len(), 1);
    }
}
