//! 公平轮转用的打乱步骤
//!
//! 上限截断前先打乱候选，避免每轮都偏向同一批条目。种子可注入，测试可用 KeepOrder 获得确定顺序。

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// 打乱策略
pub trait Shuffler {
    fn shuffle<T>(&mut self, items: &mut [T]);
}

/// StdRng 打乱；记录种子以便复现某一轮的顺序
#[derive(Debug, Clone)]
pub struct SeededShuffler {
    seed: u64,
    rng: StdRng,
}

impl SeededShuffler {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// 随机种子
    pub fn from_entropy() -> Self {
        Self::new(rand::random())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Shuffler for SeededShuffler {
    fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}

/// 不打乱，保持输入顺序
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepOrder;

impl Shuffler for KeepOrder {
    fn shuffle<T>(&mut self, _items: &mut [T]) {}
}
