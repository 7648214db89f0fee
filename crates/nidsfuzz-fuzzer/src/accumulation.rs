//! Tracks how often each rule id has recently produced a finding; once a
//! rule crosses `threshold` occurrences its counter resets and it is
//! reported as "bursting" so the selector can filter it out.

use std::collections::HashMap;

#[derive(Debug)]
pub struct AccumulationAnalyzer {
    item_map: HashMap<String, u32>,
    threshold: u32,
}

impl AccumulationAnalyzer {
    pub fn new(threshold: u32) -> AccumulationAnalyzer {
        AccumulationAnalyzer {
            item_map: HashMap::new(),
            threshold,
        }
    }

    /// Increments each item's counter and returns the subset that crossed
    /// `threshold` this call, resetting those counters to zero.
    pub fn update(&mut self, items: &[String]) -> Vec<String> {
        let mut burst = Vec::new();
        for item in items {
            let counter = self.item_map.entry(item.clone()).or_insert(0);
            *counter += 1;
            if *counter >= self.threshold {
                burst.push(item.clone());
                *counter = 0;
            }
        }
        burst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_burst_once_threshold_is_reached() {
        let mut analyzer = AccumulationAnalyzer::new(3);
        assert!(analyzer.update(&["1:1:1".to_string()]).is_empty());
        assert!(analyzer.update(&["1:1:1".to_string()]).is_empty());
        assert_eq!(analyzer.update(&["1:1:1".to_string()]), vec!["1:1:1".to_string()]);
    }

    #[test]
    fn resets_counter_after_burst() {
        let mut analyzer = AccumulationAnalyzer::new(2);
        analyzer.update(&["1:1:1".to_string()]);
        assert_eq!(analyzer.update(&["1:1:1".to_string()]), vec!["1:1:1".to_string()]);
        assert!(analyzer.update(&["1:1:1".to_string()]).is_empty());
    }

    #[test]
    fn tracks_items_independently() {
        let mut analyzer = AccumulationAnalyzer::new(1);
        let burst = analyzer.update(&["a".to_string(), "b".to_string()]);
        assert_eq!(burst.len(), 2);
    }
}
