use crate::database::models::Entity;
use crate::telos::instance::AgentTelos;
use crate::telos::observation::Observation;
use crate::telos::registry::AgentProfile;
use crate::telos::template::TelosTemplate;
use std::marker::Unpin;

/// Templates are keyed by their unique name
impl Entity for TelosTemplate {
    type Id = String;

    fn id(&self) -> Self::Id {
        self.name.clone()
    }
}

/// Profiles are keyed by the stable agent ID
impl Entity for AgentProfile {
    type Id = String;

    fn id(&self) -> Self::Id {
        self.agent_id.clone()
    }
}

/// Instances are keyed by "{agent_id}::{mission}"
impl Entity for AgentTelos {
    type Id = String;

    fn id(&self) -> Self::Id {
        self.id.clone()
    }
}

/// Observations are keyed by a generated UUID
impl Entity for Observation {
    type Id = String;

    fn id(&self) -> Self::Id {
        self.id.clone()
    }
}

// Implement Unpin for all entity types
impl Unpin for TelosTemplate {}
impl Unpin for AgentProfile {}
impl Unpin for AgentTelos {}
impl Unpin for Observation {}
