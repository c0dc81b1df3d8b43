//! 容量分配算法
//!
//! 把消费者的权重请求换算成对生产者名额池的切分。

use std::collections::BTreeMap;

use crate::entities::{CapacityProducer, Schedule};
use crate::value_objects::DistributionStrategy;

/// `capacity` 调度的优先级
pub const CAPACITY_SCHEDULE_PRIORITY: i32 = 100;
/// `producer` 调度的优先级
pub const PRODUCER_SCHEDULE_PRIORITY: i32 = 101;

#[derive(Debug, Clone, PartialEq)]
pub struct CapacityConsumer {
    pub instance_id: i64,
    pub name: String,
    pub requested: Option<i64>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapacityAllocation {
    pub instance_id: i64,
    pub name: String,
    /// 实际分到的名额数
    pub capacity: usize,
    pub producers: BTreeMap<String, usize>,
}

impl CapacityAllocation {
    /// `name1|n1 name2|n2`，按名称排序
    pub fn producer_value(&self) -> String {
        self.producers
            .iter()
            .map(|(name, count)| format!("{name}|{count}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn schedules(&self, capacity_parameter: &str, producer_parameter: &str) -> Vec<Schedule> {
        vec![
            Schedule::all_day(
                self.instance_id,
                capacity_parameter,
                self.capacity.to_string(),
                CAPACITY_SCHEDULE_PRIORITY,
            ),
            Schedule::all_day(
                self.instance_id,
                producer_parameter,
                self.producer_value(),
                PRODUCER_SCHEDULE_PRIORITY,
            ),
        ]
    }
}

fn positive(requested: Option<i64>) -> Option<i64> {
    requested.filter(|r| *r > 0)
}

/// 每个消费者的原始份额；未激活的消费者为0
pub fn distribute(consumers: &[CapacityConsumer], total_capacity: i64) -> Vec<f64> {
    let total_requested: i64 = consumers
        .iter()
        .filter(|c| c.active)
        .map(|c| positive(c.requested).unwrap_or(total_capacity))
        .sum();
    let total_requested = if total_requested == 0 {
        total_capacity
    } else {
        total_requested
    };

    consumers
        .iter()
        .map(|c| {
            if !c.active || total_requested == 0 {
                return 0.0;
            }
            let requested = positive(c.requested).unwrap_or(total_capacity) as f64;
            requested / total_requested as f64 * total_capacity as f64
        })
        .collect()
}

/// 生产者名额池
///
/// binpack 按容量降序拼接；spread 按比例交错，使任意前缀中各生产者的占比接近其容量占比。
pub fn producer_pool(strategy: DistributionStrategy, producers: &[CapacityProducer]) -> Vec<String> {
    let mut lists: Vec<(&str, usize)> = producers
        .iter()
        .filter(|p| p.capacity > 0)
        .map(|p| (p.internal_name.as_str(), p.capacity as usize))
        .collect();
    lists.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    match strategy {
        DistributionStrategy::Binpack => lists
            .iter()
            .flat_map(|(name, capacity)| std::iter::repeat(name.to_string()).take(*capacity))
            .collect(),
        DistributionStrategy::Spread => {
            let mut slots: Vec<(f64, usize, &str)> = lists
                .iter()
                .enumerate()
                .flat_map(|(rank, (name, capacity))| {
                    (0..*capacity).map(move |i| ((i as f64 + 0.5) / *capacity as f64, rank, *name))
                })
                .collect();
            slots.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            slots.into_iter().map(|(_, _, name)| name.to_string()).collect()
        }
    }
}

/// 按消费者名称顺序从名额池中依次切分
pub fn allocate(
    strategy: DistributionStrategy,
    producers: &[CapacityProducer],
    consumers: &[CapacityConsumer],
) -> Vec<CapacityAllocation> {
    let total_capacity: i64 = producers.iter().map(|p| i64::from(p.capacity.max(0))).sum();
    let shares = distribute(consumers, total_capacity);
    let pool = producer_pool(strategy, producers);

    let mut ordered: Vec<(&CapacityConsumer, f64)> = consumers.iter().zip(shares).collect();
    ordered.sort_by(|a, b| a.0.name.cmp(&b.0.name));

    let mut cursor = 0usize;
    ordered
        .into_iter()
        .map(|(consumer, share)| {
            let wanted = share.round().max(0.0) as usize;
            let end = (cursor + wanted).min(pool.len());
            let mut producers = BTreeMap::new();
            for name in &pool[cursor..end] {
                *producers.entry(name.clone()).or_insert(0) += 1;
            }
            let capacity = end - cursor;
            cursor = end;

            CapacityAllocation {
                instance_id: consumer.instance_id,
                name: consumer.name.clone(),
                capacity,
                producers,
            }
        })
        .collect()
}

/// 解析 `p1|3 p2|1` 形式的生产者分配；缺少分隔符的条目计为0
pub fn parse_producer_value(value: &str, separator: &str) -> BTreeMap<String, i64> {
    value
        .split_whitespace()
        .filter_map(|part| match part.split_once(separator) {
            Some((name, count)) if !name.is_empty() => {
                Some((name.to_string(), count.trim().parse::<i64>().unwrap_or(0)))
            }
            Some(_) => None,
            None => Some((part.to_string(), 0)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer(name: &str, capacity: i32) -> CapacityProducer {
        CapacityProducer {
            id: 0,
            configuration_id: 1,
            name: name.to_string(),
            internal_name: name.to_string(),
            capacity,
        }
    }

    fn consumer(id: i64, name: &str, requested: Option<i64>, active: bool) -> CapacityConsumer {
        CapacityConsumer {
            instance_id: id,
            name: name.to_string(),
            requested,
            active,
        }
    }

    fn values(allocations: &[CapacityAllocation]) -> Vec<(String, usize, String)> {
        allocations
            .iter()
            .map(|a| (a.name.clone(), a.capacity, a.producer_value()))
            .collect()
    }

    #[test]
    fn test_binpack_fills_largest_producer_first() {
        let producers = [producer("p1", 4), producer("p2", 2)];
        let consumers = [consumer(1, "c1", Some(2), true), consumer(2, "c2", Some(1), true)];

        let allocations = allocate(DistributionStrategy::Binpack, &producers, &consumers);
        assert_eq!(
            values(&allocations),
            vec![
                ("c1".to_string(), 4, "p1|4".to_string()),
                ("c2".to_string(), 2, "p2|2".to_string()),
            ]
        );
    }

    #[test]
    fn test_spread_interleaves_producers() {
        let producers = [producer("p1", 4), producer("p2", 2)];
        let consumers = [consumer(1, "c1", Some(2), true), consumer(2, "c2", Some(1), true)];

        let allocations = allocate(DistributionStrategy::Spread, &producers, &consumers);
        assert_eq!(
            values(&allocations),
            vec![
                ("c1".to_string(), 4, "p1|3 p2|1".to_string()),
                ("c2".to_string(), 2, "p1|1 p2|1".to_string()),
            ]
        );
    }

    #[test]
    fn test_inactive_consumers_get_nothing() {
        let producers = [producer("p1", 6)];
        let consumers = [consumer(1, "a", Some(1), false), consumer(2, "b", Some(1), true)];

        let allocations = allocate(DistributionStrategy::Binpack, &producers, &consumers);
        assert_eq!(allocations[0].capacity, 0);
        assert_eq!(allocations[0].producer_value(), "");
        assert_eq!(allocations[1].capacity, 6);
    }

    #[test]
    fn test_missing_request_defaults_to_total() {
        let shares = distribute(
            &[consumer(1, "a", None, true), consumer(2, "b", Some(0), true)],
            10,
        );
        assert_eq!(shares, vec![5.0, 5.0]);
    }

    #[test]
    fn test_allocation_never_exceeds_inventory() {
        let producers = [producer("p1", 1), producer("p2", 1), producer("p3", 1)];
        let consumers = [
            consumer(1, "a", Some(1), true),
            consumer(2, "b", Some(1), true),
            consumer(3, "c", Some(1), true),
            consumer(4, "d", Some(1), true),
        ];

        for strategy in [DistributionStrategy::Binpack, DistributionStrategy::Spread] {
            let allocations = allocate(strategy, &producers, &consumers);
            let total: usize = allocations.iter().map(|a| a.capacity).sum();
            assert!(total <= 3);
        }
    }

    #[test]
    fn test_schedules_use_fixed_priorities() {
        let allocation = CapacityAllocation {
            instance_id: 9,
            name: "c".to_string(),
            capacity: 2,
            producers: BTreeMap::from([("p1".to_string(), 2)]),
        };
        let schedules = allocation.schedules("capacity", "producer");
        assert_eq!(schedules[0].value.as_deref(), Some("2"));
        assert_eq!(schedules[0].priority, CAPACITY_SCHEDULE_PRIORITY);
        assert_eq!(schedules[1].value.as_deref(), Some("p1|2"));
        assert_eq!(schedules[1].priority, PRODUCER_SCHEDULE_PRIORITY);
        assert_eq!(schedules[1].days, "*");
    }

    #[test]
    fn test_parse_producer_value() {
        let parsed = parse_producer_value("p1|3 p2|1 lonely", "|");
        assert_eq!(parsed.get("p1"), Some(&3));
        assert_eq!(parsed.get("p2"), Some(&1));
        assert_eq!(parsed.get("lonely"), Some(&0));
        assert!(parse_producer_value("", "|").is_empty());
    }
}
