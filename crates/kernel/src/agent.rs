use glam::Vec3;
use strata_crowd::{AgentId, AgentParams, Behavior};
use strata_ecs::Component;

/// Binds an entity to its crowd agent. Added by
/// [`crate::Simulation::attach_agent`], removed by
/// [`crate::Simulation::detach_agent`]; never constructed directly.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentComponent {
    id: AgentId,
    last_goal: Option<Vec3>,
}

impl Component for AgentComponent {}

impl AgentComponent {
    pub(crate) fn new(id: AgentId) -> Self {
        Self { id, last_goal: None }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    /// Goal most recently handed to the crowd.
    pub fn last_goal(&self) -> Option<Vec3> {
        self.last_goal
    }

    pub(crate) fn set_last_goal(&mut self, goal: Option<Vec3>) {
        self.last_goal = goal;
    }
}

/// Request to turn an entity into a crowd agent.
#[derive(Debug, Clone, Default)]
pub struct AgentSpawn {
    /// Falls back to the simulation's default agent parameters.
    pub params: Option<AgentParams>,
    pub behavior: Option<Behavior>,
}

impl AgentSpawn {
    pub fn with_params(mut self, params: AgentParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = Some(behavior);
        self
    }
}
