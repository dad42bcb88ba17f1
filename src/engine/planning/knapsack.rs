//! 0/1 knapsack over whole minutes.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnapsackItem {
    pub weight: usize,
    pub value: f64,
}

impl KnapsackItem {
    pub fn new(minutes: f64, value: f64) -> Self {
        Self {
            weight: minutes_to_weight(minutes),
            value,
        }
    }
}

/// Rounded up so the scheduled total never undercounts; at least one minute.
pub fn minutes_to_weight(minutes: f64) -> usize {
    minutes.ceil().max(1.0) as usize
}

pub fn budget_capacity(max_minutes: f64) -> usize {
    if max_minutes.is_nan() || max_minutes <= 0.0 {
        return 0;
    }
    max_minutes.floor() as usize
}

/// Indices of the value-maximizing subset whose weights fit `capacity`,
/// ascending. Items with non-positive value are never selected.
pub fn solve(items: &[KnapsackItem], capacity: usize) -> Vec<usize> {
    let total_weight = items
        .iter()
        .fold(0usize, |acc, item| acc.saturating_add(item.weight));
    let capacity = capacity.min(total_weight);
    let width = capacity + 1;

    let mut best = vec![0.0f64; width];
    let mut keep = vec![false; items.len() * width];

    for (i, item) in items.iter().enumerate() {
        if item.value <= 0.0 || item.weight > capacity {
            continue;
        }
        for w in (item.weight..=capacity).rev() {
            let with_item = best[w - item.weight] + item.value;
            if with_item > best[w] {
                best[w] = with_item;
                keep[i * width + w] = true;
            }
        }
    }

    let mut selected = Vec::new();
    let mut w = capacity;
    for i in (0..items.len()).rev() {
        if keep[i * width + w] {
            selected.push(i);
            w -= items[i].weight;
        }
    }
    selected.reverse();
    selected
}
