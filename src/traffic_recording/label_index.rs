use std::collections::HashMap;

use super::types::{CardinalityEntry, Label};

#[derive(Debug)]
struct Counter {
    ordinal: u64,
    count: u64,
}

#[derive(Debug)]
struct NameEntry {
    counter: Counter,
    values: HashMap<String, Counter>,
}

/// Occurrence counts of label names and values over the retained traffic records.
///
/// Rankings are ordered by descending count; ties go to whatever was seen first. Counts are
/// decremented when records are evicted, and entries that drop to zero are forgotten.
#[derive(Debug, Default)]
pub struct LabelIndex {
    names: HashMap<String, NameEntry>,
    next_ordinal: u64,
}

impl LabelIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn ordinal(&mut self) -> u64 {
        self.next_ordinal += 1;
        self.next_ordinal
    }

    pub fn add(&mut self, label: &Label) {
        if !self.names.contains_key(&label.name) {
            let ordinal = self.ordinal();
            self.names.insert(
                label.name.clone(),
                NameEntry {
                    counter: Counter { ordinal, count: 0 },
                    values: HashMap::new(),
                },
            );
        }
        let value_ordinal = self.ordinal();
        if let Some(entry) = self.names.get_mut(&label.name) {
            entry.counter.count += 1;
            entry
                .values
                .entry(label.value.clone())
                .or_insert(Counter {
                    ordinal: value_ordinal,
                    count: 0,
                })
                .count += 1;
        }
    }

    pub fn remove(&mut self, label: &Label) {
        let Some(entry) = self.names.get_mut(&label.name) else {
            return;
        };
        if let Some(value) = entry.values.get_mut(&label.value) {
            value.count -= 1;
            if value.count == 0 {
                entry.values.remove(&label.value);
            }
            entry.counter.count -= 1;
        }
        if entry.counter.count == 0 {
            self.names.remove(&label.name);
        }
    }

    /// Label names ordered by cardinality, optionally restricted to a prefix.
    pub fn top_names(&self, prefix: Option<&str>, top_n: usize) -> Vec<CardinalityEntry> {
        rank(
            self.names
                .iter()
                .map(|(name, entry)| (name, &entry.counter)),
            prefix,
            top_n,
        )
    }

    /// Values of one label ordered by cardinality, optionally restricted to a prefix.
    pub fn top_values(
        &self,
        name: &str,
        prefix: Option<&str>,
        top_n: usize,
    ) -> Vec<CardinalityEntry> {
        match self.names.get(name) {
            Some(entry) => rank(entry.values.iter(), prefix, top_n),
            None => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn rank<'a, I>(entries: I, prefix: Option<&str>, top_n: usize) -> Vec<CardinalityEntry>
where
    I: Iterator<Item = (&'a String, &'a Counter)>,
{
    let mut ranked: Vec<(&String, &Counter)> = entries
        .filter(|(v, _)| prefix.map_or(true, |p| v.starts_with(p)))
        .collect();
    ranked.sort_by(|(_, a), (_, b)| b.count.cmp(&a.count).then(a.ordinal.cmp(&b.ordinal)));
    ranked
        .into_iter()
        .take(top_n)
        .map(|(value, counter)| CardinalityEntry {
            value: value.clone(),
            count: counter.count,
        })
        .collect()
}
