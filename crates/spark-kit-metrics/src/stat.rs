//! 样本统计：最小值、最大值、总和、平均值与次数。

use std::collections::HashMap;

use parking_lot::Mutex;

/// 一组样本的统计结果。空样本集合的所有字段均为零。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Statistic {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub avg: f64,
    pub count: u64,
}

#[derive(Debug, Default)]
struct CounterState {
    min: f64,
    max: f64,
    sum: f64,
    count: u64,
}

/// 线程安全的样本累加器，既可以当计数器用，也可以承接 Gauge 样本。
#[derive(Debug, Default)]
pub struct StatCounter {
    state: Mutex<CounterState>,
}

impl StatCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个样本。
    pub fn incr_by(&self, value: f64) {
        let mut state = self.state.lock();
        if state.count == 0 {
            *state = CounterState {
                min: value,
                max: value,
                sum: value,
                count: 1,
            };
            return;
        }

        if value < state.min {
            state.min = value;
        }
        if value > state.max {
            state.max = value;
        }
        state.sum += value;
        state.count += 1;
    }

    /// 当前统计快照。
    pub fn statistic(&self) -> Statistic {
        let state = self.state.lock();
        if state.count == 0 {
            return Statistic::default();
        }
        Statistic {
            min: state.min,
            max: state.max,
            sum: state.sum,
            avg: state.sum / state.count as f64,
            count: state.count,
        }
    }
}

/// 按指标名聚合样本，周期结束时一次性取出并清空。
///
/// # 教案式说明
/// - **意图（Why）**：日志上报器每个周期只输出一行/指标，需要把周期内的样本合并；
/// - **契约（What）**：`drain` 返回按名称排序的统计结果，并把内部状态重置为空；
/// - **实现（How）**：由单个后台任务独占持有，因此内部使用普通 `HashMap`。
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    counters: HashMap<String, StatCounter>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &str, value: f64) {
        if let Some(counter) = self.counters.get(name) {
            counter.incr_by(value);
            return;
        }
        let counter = StatCounter::new();
        counter.incr_by(value);
        self.counters.insert(name.to_owned(), counter);
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn drain(&mut self) -> Vec<(String, Statistic)> {
        let mut out: Vec<(String, Statistic)> = self
            .counters
            .drain()
            .map(|(name, counter)| (name, counter.statistic()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_counter_reports_zeros() {
        assert_eq!(StatCounter::new().statistic(), Statistic::default());
    }

    #[test]
    fn counter_tracks_min_max_sum() {
        let counter = StatCounter::new();
        for v in [3.0, -1.0, 4.0] {
            counter.incr_by(v);
        }
        let stat = counter.statistic();
        assert_eq!(stat.min, -1.0);
        assert_eq!(stat.max, 4.0);
        assert_eq!(stat.sum, 6.0);
        assert_eq!(stat.avg, 2.0);
        assert_eq!(stat.count, 3);
    }

    #[test]
    fn drain_resets_and_sorts() {
        let mut agg = MetricsAggregator::new();
        agg.record("b", 1.0);
        agg.record("a", 2.0);
        agg.record("b", 1.0);

        let drained = agg.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, "a");
        assert_eq!(drained[1].1.count, 2);
        assert!(agg.is_empty());
        assert!(agg.drain().is_empty());
    }

    proptest! {
        #[test]
        fn statistic_bounds_hold(samples in proptest::collection::vec(-1.0e6f64..1.0e6, 1..64)) {
            let counter = StatCounter::new();
            for v in &samples {
                counter.incr_by(*v);
            }
            let stat = counter.statistic();
            prop_assert_eq!(stat.count, samples.len() as u64);
            prop_assert!(stat.min <= stat.avg + 1e-6);
            prop_assert!(stat.avg <= stat.max + 1e-6);
            let expected_min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
            let expected_max = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assert_eq!(stat.min, expected_min);
            prop_assert_eq!(stat.max, expected_max);
        }
    }
}
