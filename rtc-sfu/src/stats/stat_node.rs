use super::Stat;
use std::collections::BTreeMap;
use std::fmt;

/// Either a leaf stat or a nested node.
#[derive(Debug, Clone)]
pub enum StatEntry {
    Stat(Stat),
    Node(StatNode),
}

/// Keyed tree of stats rendered as a JSON object.
///
/// A key holds either a stat or a child node, never both. Keys are kept sorted so the
/// rendering is deterministic. Child nodes are created on first access through
/// [`StatNode::node`].
///
/// ```ignore
/// let mut stats = StatNode::new();
/// stats.node("total").insert_stat("senderBitrateEstimation", CumulativeStat(300_000));
/// assert_eq!(stats.to_string(), r#"{"total":{"senderBitrateEstimation":300000}}"#);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StatNode {
    stats: BTreeMap<String, Stat>,
    children: BTreeMap<String, StatNode>,
}

impl StatNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child node at `key`, created if missing. A stat stored at `key` is replaced.
    pub fn node(&mut self, key: &str) -> &mut StatNode {
        self.stats.remove(key);
        self.children.entry(key.to_owned()).or_default()
    }

    pub fn child(&self, key: &str) -> Option<&StatNode> {
        self.children.get(key)
    }

    pub fn child_mut(&mut self, key: &str) -> Option<&mut StatNode> {
        self.children.get_mut(key)
    }

    pub fn stat(&self, key: &str) -> Option<&Stat> {
        self.stats.get(key)
    }

    pub fn stat_mut(&mut self, key: &str) -> Option<&mut Stat> {
        self.stats.get_mut(key)
    }

    /// Stores `stat` at `key`, overwriting whatever was there.
    pub fn insert_stat(&mut self, key: &str, stat: impl Into<Stat>) {
        self.children.remove(key);
        self.stats.insert(key.to_owned(), stat.into());
    }

    /// Adds `value` to the stat at `key`. Returns false when there is no stat there.
    pub fn add(&mut self, key: &str, value: u64) -> bool {
        match self.stat_mut(key) {
            Some(stat) => {
                stat.add(value);
                true
            }
            None => false,
        }
    }

    pub fn value(&self, key: &str) -> Option<u64> {
        self.stat(key).map(Stat::value)
    }

    pub fn has_child(&self, key: &str) -> bool {
        self.stats.contains_key(key) || self.children.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<StatEntry> {
        self.stats
            .remove(key)
            .map(StatEntry::Stat)
            .or_else(|| self.children.remove(key).map(StatEntry::Node))
    }

    /// Leaf stats in key order.
    pub fn stats(&self) -> impl Iterator<Item = (&str, &Stat)> {
        self.stats.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Child nodes in key order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &StatNode)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.stats.len() + self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty() && self.children.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let stats = self
            .stats
            .iter()
            .map(|(key, stat)| (key.clone(), stat.to_json()));
        let children = self
            .children
            .iter()
            .map(|(key, node)| (key.clone(), node.to_json()));
        // serde_json keeps object keys sorted
        serde_json::Value::Object(stats.chain(children).collect())
    }
}

impl fmt::Display for StatNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{CumulativeStat, MovingAverageStat, StringStat};

    #[test]
    fn test_empty_node_renders_empty_object() {
        assert_eq!(StatNode::new().to_string(), "{}");
    }

    #[test]
    fn test_cumulative_stat_renders_and_increments() {
        let mut node = StatNode::new();
        node.insert_stat("sum", CumulativeStat(30));
        assert_eq!(node.to_string(), r#"{"sum":30}"#);

        assert!(node.add("sum", 1));
        assert_eq!(node.to_string(), r#"{"sum":31}"#);
    }

    #[test]
    fn test_insert_overwrites_existing_key() {
        let mut node = StatNode::new();
        node.insert_stat("sum", CumulativeStat(30));
        node.insert_stat("sum", CumulativeStat(2));
        assert_eq!(node.value("sum"), Some(2));
        assert_eq!(node.len(), 1);
    }

    #[test]
    fn test_nested_nodes_and_strings() {
        let mut node = StatNode::new();
        node.node("video")
            .insert_stat("codec", StringStat("VP8".to_owned()));
        node.node("video").insert_stat("bitrate", CumulativeStat(500));
        let mut average = MovingAverageStat::new(2);
        average.add(4);
        average.add(6);
        node.insert_stat("avg", average);

        assert_eq!(
            node.to_string(),
            r#"{"avg":5,"video":{"bitrate":500,"codec":"VP8"}}"#
        );
    }

    #[test]
    fn test_rendering_is_independent_of_insertion_order() {
        let mut a = StatNode::new();
        a.insert_stat("b", CumulativeStat(2));
        a.insert_stat("a", CumulativeStat(1));
        let mut b = StatNode::new();
        b.insert_stat("a", CumulativeStat(1));
        b.insert_stat("b", CumulativeStat(2));
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_add_to_missing_stat() {
        let mut node = StatNode::new();
        assert!(!node.add("missing", 1));
        node.node("child");
        assert!(!node.add("child", 1));
        assert!(node.has_child("child"));
        assert!(node.child("child").is_some_and(StatNode::is_empty));
    }

    #[test]
    fn test_node_and_stat_replace_each_other() {
        let mut node = StatNode::new();
        node.insert_stat("layer", CumulativeStat(7));
        node.node("layer").insert_stat("0", CumulativeStat(1));
        assert_eq!(node.value("layer"), None);
        assert_eq!(node.to_string(), r#"{"layer":{"0":1}}"#);

        node.insert_stat("layer", CumulativeStat(9));
        assert!(node.child("layer").is_none());
        assert_eq!(node.len(), 1);
        assert!(matches!(node.remove("layer"), Some(StatEntry::Stat(_))));
        assert!(node.is_empty());
    }
}
