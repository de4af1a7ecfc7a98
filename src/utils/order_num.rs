use chrono::Utc;
use std::sync::{Arc, Mutex};

/// 2024-01-01T00:00:00Z
const EPOCH_MS: i64 = 1_704_067_200_000;
const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug, Default)]
struct State {
    last_ms: i64,
    sequence: i64,
}

/// 雪花算法订单号：41 位毫秒时间戳 | 10 位机器 ID | 12 位序列号
#[derive(Debug, Clone)]
pub struct OrderNumGenerator {
    node_id: i64,
    state: Arc<Mutex<State>>,
}

impl OrderNumGenerator {
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id: i64::from(node_id.min(MAX_NODE_ID)),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn next_id(&self) -> i64 {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        // 时钟回拨时沿用上一次的时间戳
        let now = (Utc::now().timestamp_millis() - EPOCH_MS).max(state.last_ms);
        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // 本毫秒序列号用尽，借用下一毫秒
                state.last_ms += 1;
            }
        } else {
            state.last_ms = now;
            state.sequence = 0;
        }
        (state.last_ms << (NODE_BITS + SEQUENCE_BITS))
            | (self.node_id << SEQUENCE_BITS)
            | state.sequence
    }

    pub fn next_order_num(&self) -> String {
        self.next_id().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let generator = OrderNumGenerator::new(1);
        let ids: Vec<i64> = (0..10_000).map(|_| generator.next_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), ids.len());
    }

    #[test]
    fn test_node_id_is_embedded() {
        let generator = OrderNumGenerator::new(5);
        let id = generator.next_id();
        assert_eq!((id >> SEQUENCE_BITS) & i64::from(MAX_NODE_ID), 5);
    }

    #[test]
    fn test_distinct_nodes_never_collide() {
        let a = OrderNumGenerator::new(1);
        let b = OrderNumGenerator::new(2);
        let left: HashSet<String> = (0..1_000).map(|_| a.next_order_num()).collect();
        assert!((0..1_000).all(|_| !left.contains(&b.next_order_num())));
    }
}
