//! Bounded per-project conversation log

use dashmap::DashMap;
use kiln_artifact::ProjectId;
use kiln_engine::ConversationTurn;
use std::collections::VecDeque;

/// Recent turns per project; older turns fall off the front
#[derive(Debug)]
pub struct ConversationLog {
    turns: DashMap<ProjectId, VecDeque<ConversationTurn>>,
    capacity: usize,
}

impl ConversationLog {
    /// Keep at most `capacity` turns per project
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: DashMap::new(),
            capacity,
        }
    }

    /// Append a turn
    pub fn record(&self, project: &ProjectId, turn: ConversationTurn) {
        if self.capacity == 0 {
            return;
        }
        let mut turns = self.turns.entry(project.clone()).or_default();
        while turns.len() >= self.capacity {
            turns.pop_front();
        }
        turns.push_back(turn);
    }

    /// Recent turns, oldest first
    #[must_use]
    pub fn recent(&self, project: &ProjectId) -> Vec<ConversationTurn> {
        self.turns
            .get(project)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_turns() {
        let log = ConversationLog::new(3);
        let project = ProjectId::new("p");
        for i in 0..5 {
            log.record(&project, ConversationTurn::user(format!("m{i}")));
        }
        let texts: Vec<_> = log.recent(&project).into_iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
        assert!(log.recent(&ProjectId::new("other")).is_empty());
    }

    #[test]
    fn zero_capacity_records_nothing() {
        let log = ConversationLog::new(0);
        let project = ProjectId::new("p");
        log.record(&project, ConversationTurn::user("hi"));
        assert!(log.recent(&project).is_empty());
    }
}
