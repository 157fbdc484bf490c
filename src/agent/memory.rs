use std::collections::{VecDeque, vec_deque};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::gym::{Reward, action::Action, state::State};

/// Single experience tuple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: State,
    /// The decided (decidable) action, after guard correction.
    pub action: Action,
    pub reward: Reward,
    pub next_state: State,
    pub done: bool,
}

/// Bounded FIFO of transitions owned by one agent.
///
/// Once `capacity` is reached every push evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct ExperienceBuffer {
    buffer: VecDeque<Transition>,
    capacity: usize,
}

impl ExperienceBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn push(&mut self, transition: Transition) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    /// The `n` most recent transitions, oldest first. `None` while fewer are stored.
    pub fn recent(&self, n: usize) -> Option<vec_deque::Iter<'_, Transition>> {
        let start = self.buffer.len().checked_sub(n)?;
        Some(self.buffer.range(start..))
    }

    /// Up to `n` transitions drawn uniformly without replacement.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, n: usize) -> Vec<Transition> {
        let amount = n.min(self.buffer.len());
        rand::seq::index::sample(rng, self.buffer.len(), amount)
            .into_iter()
            .map(|i| self.buffer[i])
            .collect()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, Transition> {
        self.buffer.iter()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn transition(i: usize) -> Transition {
        Transition {
            state: State(i % 64),
            action: Action::Wait,
            reward: Reward(i as f64),
            next_state: State((i + 1) % 64),
            done: false,
        }
    }

    #[test]
    fn test_overflow_keeps_most_recent_in_order() {
        let capacity = 20_000;
        let mut memory = ExperienceBuffer::new(capacity);
        for i in 0..capacity + 1234 {
            memory.push(transition(i));
        }
        assert_eq!(memory.len(), capacity);
        let rewards: Vec<f64> = memory.iter().map(|t| t.reward.0).collect();
        let expected: Vec<f64> = (1234..capacity + 1234).map(|i| i as f64).collect();
        assert_eq!(rewards, expected);
    }

    #[test]
    fn test_recent_window() {
        let mut memory = ExperienceBuffer::new(10);
        for i in 0..5 {
            memory.push(transition(i));
        }
        assert!(memory.recent(6).is_none());
        let window: Vec<f64> = memory.recent(3).unwrap().map(|t| t.reward.0).collect();
        assert_eq!(window, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_sample_without_replacement() {
        let mut memory = ExperienceBuffer::new(100);
        for i in 0..50 {
            memory.push(transition(i));
        }
        let mut rng = StdRng::seed_from_u64(7);
        let sample = memory.sample(&mut rng, 20);
        assert_eq!(sample.len(), 20);
        let unique: HashSet<u64> = sample.iter().map(|t| t.reward.0 as u64).collect();
        assert_eq!(unique.len(), 20);

        assert_eq!(memory.sample(&mut rng, 500).len(), 50);
    }
}
