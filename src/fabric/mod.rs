//! Coordination fabric: the persistent shared substrate through which
//! concurrent phases publish entanglements, claim file exclusivity, emit
//! pulses, and surface discoveries.

mod store;
mod types;

pub use store::FabricStore;
pub use types::{
    Discovery, DiscoveryKind, Entanglement, EntanglementKind, EntanglementSpec,
    EntanglementStatus, FileClaim, PhaseState, Pulse, PulseKind, Snapshot,
};
