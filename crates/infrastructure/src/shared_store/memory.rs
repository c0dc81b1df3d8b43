use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use riberry_core::{RiberryResult, SharedStore};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct StoreState {
    strings: HashMap<String, (String, Option<Instant>)>,
    sorted_sets: HashMap<String, HashMap<String, f64>>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl StoreState {
    fn live_string(&mut self, key: &str) -> Option<&String> {
        let expired = matches!(
            self.strings.get(key),
            Some((_, Some(deadline))) if *deadline <= Instant::now()
        );
        if expired {
            self.strings.remove(key);
        }
        self.strings.get(key).map(|(value, _)| value)
    }

    fn incr(&mut self, key: &str, member: &str, by: f64) -> f64 {
        let score = self
            .sorted_sets
            .entry(key.to_string())
            .or_default()
            .entry(member.to_string())
            .or_insert(0.0);
        *score += by;
        *score
    }

    fn sorted_desc(&self, key: &str) -> Vec<(String, f64)> {
        let mut members: Vec<(String, f64)> = self
            .sorted_sets
            .get(key)
            .map(|set| set.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        members
    }
}

/// 进程内共享资源存储，供单进程部署与测试使用
///
/// 所有操作在同一把互斥锁下完成，天然满足多键原子性。
#[derive(Debug, Clone, Default)]
pub struct InMemorySharedStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清空所有键
    pub async fn flush_all(&self) {
        let mut state = self.state.lock().await;
        *state = StoreState::default();
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn get(&self, key: &str) -> RiberryResult<Option<String>> {
        let mut state = self.state.lock().await;
        Ok(state.live_string(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> RiberryResult<()> {
        let mut state = self.state.lock().await;
        state
            .strings
            .insert(key.to_string(), (value.to_string(), None));
        Ok(())
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> RiberryResult<()> {
        let mut state = self.state.lock().await;
        let deadline = Instant::now() + Duration::from_millis(ttl_ms.max(1));
        state
            .strings
            .insert(key.to_string(), (value.to_string(), Some(deadline)));
        Ok(())
    }

    async fn exists(&self, key: &str) -> RiberryResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state.live_string(key).is_some()
            || state.sorted_sets.get(key).is_some_and(|s| !s.is_empty())
            || state.sets.get(key).is_some_and(|s| !s.is_empty()))
    }

    async fn delete(&self, keys: &[String]) -> RiberryResult<()> {
        let mut state = self.state.lock().await;
        for key in keys {
            state.strings.remove(key);
            state.sorted_sets.remove(key);
            state.sets.remove(key);
        }
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> RiberryResult<bool> {
        let mut state = self.state.lock().await;
        if state.live_string(key).map(String::as_str) != expected {
            return Ok(false);
        }
        state
            .strings
            .insert(key.to_string(), (value.to_string(), None));
        Ok(true)
    }

    async fn try_lock(&self, key: &str, token: &str, ttl_ms: u64) -> RiberryResult<bool> {
        let mut state = self.state.lock().await;
        if state.live_string(key).is_some() {
            return Ok(false);
        }
        let deadline = Instant::now() + Duration::from_millis(ttl_ms.max(1));
        state
            .strings
            .insert(key.to_string(), (token.to_string(), Some(deadline)));
        Ok(true)
    }

    async fn unlock(&self, key: &str, token: &str) -> RiberryResult<bool> {
        let mut state = self.state.lock().await;
        if state.live_string(key).map(String::as_str) != Some(token) {
            return Ok(false);
        }
        state.strings.remove(key);
        Ok(true)
    }

    async fn zadd(&self, key: &str, members: &[(String, f64)]) -> RiberryResult<()> {
        let mut state = self.state.lock().await;
        let set = state.sorted_sets.entry(key.to_string()).or_default();
        for (member, score) in members {
            set.insert(member.clone(), *score);
        }
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> RiberryResult<Option<f64>> {
        let state = self.state.lock().await;
        Ok(state
            .sorted_sets
            .get(key)
            .and_then(|set| set.get(member).copied()))
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> RiberryResult<Vec<String>> {
        let state = self.state.lock().await;
        let mut members = state.sorted_desc(key);
        members.reverse();
        Ok(members
            .into_iter()
            .filter(|(_, score)| *score >= min && *score <= max)
            .map(|(member, _)| member)
            .collect())
    }

    async fn zrevrange_with_scores(&self, key: &str) -> RiberryResult<Vec<(String, f64)>> {
        let state = self.state.lock().await;
        Ok(state.sorted_desc(key))
    }

    async fn zmove_top(&self, src: &str, dst: &str) -> RiberryResult<Option<(String, f64)>> {
        let mut state = self.state.lock().await;
        let Some((member, _)) = state.sorted_desc(src).into_iter().next() else {
            return Ok(None);
        };
        let score = state.incr(src, &member, -1.0);
        state.incr(dst, &member, 1.0);
        Ok(Some((member, score)))
    }

    async fn zmove(&self, src: &str, dst: &str, member: &str) -> RiberryResult<()> {
        let mut state = self.state.lock().await;
        state.incr(src, member, -1.0);
        state.incr(dst, member, 1.0);
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> RiberryResult<()> {
        let mut state = self.state.lock().await;
        state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> RiberryResult<()> {
        let mut state = self.state.lock().await;
        if let Some(set) = state.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> RiberryResult<bool> {
        let state = self.state.lock().await;
        Ok(state.sets.get(key).is_some_and(|set| set.contains(member)))
    }

    async fn smembers(&self, key: &str) -> RiberryResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn replace_set(&self, key: &str, members: &[String]) -> RiberryResult<()> {
        let mut state = self.state.lock().await;
        state
            .sets
            .insert(key.to_string(), members.iter().cloned().collect());
        Ok(())
    }

    async fn time(&self) -> RiberryResult<f64> {
        let now = Utc::now();
        Ok(now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0)
    }
}
