use serde::{Deserialize, Serialize};

use crate::crowd::{AgentId, AgentTuning, Crowd};

/// Global tuning preset applied over every agent's base parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyLevel {
    Easy,
    #[default]
    Normal,
    Hard,
    Custom { speed: f32, acceleration: f32 },
}

impl DifficultyLevel {
    pub fn tuning(&self) -> AgentTuning {
        let (speed, acceleration) = match *self {
            DifficultyLevel::Easy => (0.75, 0.75),
            DifficultyLevel::Normal => (1.0, 1.0),
            DifficultyLevel::Hard => (1.3, 1.5),
            DifficultyLevel::Custom { speed, acceleration } => (speed.max(0.0), acceleration.max(0.0)),
        };
        AgentTuning { speed, acceleration }
    }
}

/// Holds the active level and a change waiting for the next tick boundary.
#[derive(Debug, Clone, Default)]
pub struct DifficultyController {
    level: DifficultyLevel,
    pending: Option<DifficultyLevel>,
}

impl DifficultyController {
    pub fn new(level: DifficultyLevel) -> Self {
        Self { level, pending: None }
    }

    pub fn level(&self) -> DifficultyLevel {
        self.level
    }

    pub fn pending(&self) -> Option<DifficultyLevel> {
        self.pending
    }

    /// Queue a level change; it takes effect at the next [`apply_pending`].
    ///
    /// [`apply_pending`]: DifficultyController::apply_pending
    pub fn request(&mut self, level: DifficultyLevel) {
        self.pending = Some(level);
    }

    /// Switch to the queued level, if any, and retune every live agent.
    /// Returns the level that became active.
    pub fn apply_pending(&mut self, crowd: &mut Crowd) -> Option<DifficultyLevel> {
        let level = self.pending.take()?;
        self.level = level;
        self.apply(crowd);
        tracing::info!(?level, agents = crowd.agent_count(), "difficulty applied");
        Some(level)
    }

    /// Apply the active level to every live agent.
    pub fn apply(&self, crowd: &mut Crowd) {
        let tuning = self.level.tuning();
        let ids: Vec<AgentId> = crowd.active_agents().collect();
        for id in ids {
            crowd.set_agent_tuning(id, tuning);
        }
    }

    /// Apply the active level to one newly added agent.
    pub fn tune_agent(&self, crowd: &mut Crowd, id: AgentId) {
        crowd.set_agent_tuning(id, self.level.tuning());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_scale_speed() {
        assert_eq!(DifficultyLevel::Normal.tuning(), AgentTuning::default());
        assert!(DifficultyLevel::Easy.tuning().speed < 1.0);
        assert!(DifficultyLevel::Hard.tuning().speed > 1.0);
        let custom = DifficultyLevel::Custom {
            speed: 2.0,
            acceleration: -1.0,
        };
        assert_eq!(custom.tuning().speed, 2.0);
        assert_eq!(custom.tuning().acceleration, 0.0);
    }

    #[test]
    fn request_is_deferred() {
        let mut c = DifficultyController::default();
        c.request(DifficultyLevel::Hard);
        assert_eq!(c.level(), DifficultyLevel::Normal);
        assert_eq!(c.pending(), Some(DifficultyLevel::Hard));
    }

    #[test]
    fn level_deserializes_from_json() {
        let level: DifficultyLevel = serde_json::from_str("\"hard\"").unwrap();
        assert_eq!(level, DifficultyLevel::Hard);
        let custom: DifficultyLevel =
            serde_json::from_str(r#"{"custom":{"speed":1.5,"acceleration":2.0}}"#).unwrap();
        assert_eq!(
            custom,
            DifficultyLevel::Custom {
                speed: 1.5,
                acceleration: 2.0
            }
        );
    }
}
