// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::task::Priority;
use std::collections::HashMap;

/// 队列拓扑
///
/// 将优先级层级映射到队列名与出队权重
#[derive(Debug, Clone)]
pub struct QueueTopology {
    prefix: String,
    weights: HashMap<Priority, u32>,
}

impl QueueTopology {
    /// 创建队列拓扑，权重至少为1以避免低优先级队列饿死
    pub fn new(prefix: impl Into<String>, weights: HashMap<Priority, u32>) -> Self {
        let weights = Priority::ALL
            .iter()
            .map(|p| (*p, weights.get(p).copied().unwrap_or(p.default_weight()).max(1)))
            .collect();
        Self {
            prefix: prefix.into(),
            weights,
        }
    }

    /// 使用默认权重 6/4/3/1
    pub fn with_default_weights(prefix: impl Into<String>) -> Self {
        Self::new(prefix, HashMap::new())
    }

    /// 优先级对应的队列名
    pub fn queue_for(&self, priority: Priority) -> String {
        format!("{}:{}", self.prefix, priority)
    }

    /// 优先级对应的权重
    pub fn weight_of(&self, priority: Priority) -> u32 {
        self.weights
            .get(&priority)
            .copied()
            .unwrap_or(priority.default_weight())
    }

    /// 所有队列及权重，按优先级从高到低
    pub fn queues(&self) -> Vec<(String, u32)> {
        Priority::ALL
            .iter()
            .map(|p| (self.queue_for(*p), self.weight_of(*p)))
            .collect()
    }

    /// 所有队列名
    pub fn queue_names(&self) -> Vec<String> {
        Priority::ALL.iter().map(|p| self.queue_for(*p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_weight_is_raised_to_one() {
        let mut weights = HashMap::new();
        weights.insert(Priority::Low, 0);
        let topology = QueueTopology::new("dispatch", weights);

        assert_eq!(topology.weight_of(Priority::Low), 1);
        assert_eq!(topology.weight_of(Priority::Critical), 6);
        assert_eq!(topology.queue_for(Priority::High), "dispatch:high");
    }
}
