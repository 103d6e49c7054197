//! Aggregation of transport errors by canonical description.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Counts occurrences of distinct error descriptions. Transport errors never
/// abort a bombardment; they all end up here and are reported at the end.
pub struct ErrorAggregator {
    counts: Mutex<HashMap<String, u64>>,
}

impl ErrorAggregator {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, description: &str) {
        let mut counts = self.counts.lock();
        match counts.get_mut(description) {
            Some(count) => *count += 1,
            None => {
                counts.insert(description.to_owned(), 1);
            }
        }
    }

    pub fn sum(&self) -> u64 {
        self.counts.lock().values().sum()
    }

    /// Descending by count; ties broken by lexicographic description.
    pub fn by_frequency(&self) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = self
            .counts
            .lock()
            .iter()
            .map(|(desc, &count)| (desc.clone(), count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

impl Default for ErrorAggregator {
    fn default() -> Self {
        Self::new()
    }
}
