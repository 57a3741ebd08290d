//! Flotilla Simulation Backends - In-memory registry and hub transport.
//!
//! Implements flotilla-core's external collaborator traits without any
//! network: an identity registry backed by a HashMap and a hub transport
//! that records connections and messages. Both support deterministic
//! seeding and failure injection so fleet behavior can be tested under
//! controlled, reproducible conditions.

pub mod registry;
pub mod transport;

pub use registry::{InMemoryRegistry, InMemoryRegistryBuilder};
pub use transport::{SimulatedConnection, SimulatedTransport, SimulatedTransportBuilder};
