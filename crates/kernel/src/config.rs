use serde::{Deserialize, Serialize};
use strata_crowd::{AgentParams, CrowdConfig, DifficultyLevel};
use strata_navmesh::BakeConfig;
use strata_physics::PhysicsConfig;

/// Everything a [`crate::Simulation`] needs before the first bake.
///
/// Missing fields in a config file fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seeds the per-tick RNG stream and wander behaviors.
    pub seed: u64,
    pub bake: BakeConfig,
    pub crowd: CrowdConfig,
    pub physics: PhysicsConfig,
    pub difficulty: DifficultyLevel,
    /// Parameters for agents attached without explicit ones.
    pub agent: AgentParams,
    /// How far from an entity an agent may be snapped onto the navmesh.
    pub spawn_search_radius: f32,
    /// A behavior goal must move this far before the agent is re-routed.
    pub replan_distance: f32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            bake: BakeConfig::default(),
            crowd: CrowdConfig::default(),
            physics: PhysicsConfig::default(),
            difficulty: DifficultyLevel::Normal,
            agent: AgentParams::default(),
            spawn_search_radius: 2.0,
            replan_distance: 0.25,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: SimConfig = serde_json::from_str(
            r#"{
                "seed": 9,
                "difficulty": "hard",
                "physics": { "gravity": [0.0, -3.0, 0.0] },
                "crowd": { "max_agents": 4 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.seed, 9);
        assert_eq!(cfg.difficulty, DifficultyLevel::Hard);
        assert_eq!(cfg.physics.gravity.y, -3.0);
        assert!(cfg.physics.gravity_enabled);
        assert_eq!(cfg.crowd.max_agents, 4);
        assert_eq!(cfg.crowd.max_neighbours, CrowdConfig::default().max_neighbours);
        assert_eq!(cfg.bake, BakeConfig::default());
        assert_eq!(cfg.spawn_search_radius, 2.0);
    }
}
