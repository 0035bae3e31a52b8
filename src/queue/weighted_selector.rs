// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 平滑加权轮询选择器
///
/// 每轮把各队列的当前值加上其权重，选出当前值最大的队列并减去总权重。
/// 一个完整周期内每个队列被选中的次数严格等于其权重，且选择结果均匀穿插，
/// 不会连续集中在高权重队列上。
///
/// 每个 worker 持有自己的选择器，不跨任务共享。
#[derive(Debug, Clone)]
pub struct WeightedSelector {
    slots: Vec<Slot>,
    total: i64,
}

#[derive(Debug, Clone)]
struct Slot {
    queue: String,
    weight: i64,
    current: i64,
}

impl WeightedSelector {
    /// 创建选择器
    ///
    /// # 参数
    ///
    /// * `queues` - 队列名与权重；权重为0的队列按1处理
    pub fn new(queues: Vec<(String, u32)>) -> Self {
        let slots: Vec<Slot> = queues
            .into_iter()
            .map(|(queue, weight)| Slot {
                queue,
                weight: i64::from(weight.max(1)),
                current: 0,
            })
            .collect();
        let total = slots.iter().map(|s| s.weight).sum();
        Self { slots, total }
    }

    /// 选出下一个队列
    pub fn next(&mut self) -> Option<&str> {
        let index = self.pick()?;
        Some(self.slots[index].queue.as_str())
    }

    /// 本轮的出队顺序：选中的队列在前，其余按权重从高到低作为回退
    pub fn next_order(&mut self) -> Vec<String> {
        let Some(index) = self.pick() else {
            return Vec::new();
        };

        let mut rest: Vec<&Slot> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, s)| s)
            .collect();
        rest.sort_by(|a, b| b.weight.cmp(&a.weight));

        let mut order = Vec::with_capacity(self.slots.len());
        order.push(self.slots[index].queue.clone());
        order.extend(rest.into_iter().map(|s| s.queue.clone()));
        order
    }

    fn pick(&mut self) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }

        for slot in self.slots.iter_mut() {
            slot.current += slot.weight;
        }
        let mut best = 0;
        for i in 1..self.slots.len() {
            if self.slots[i].current > self.slots[best].current {
                best = i;
            }
        }
        self.slots[best].current -= self.total;
        Some(best)
    }
}
