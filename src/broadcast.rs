//! Real-time distribution engine.
//!
//! Dashboard connections subscribe to a fixed set of topics; domain events
//! are wrapped into envelopes and fanned out to every subscriber's bounded
//! outbound queue. A liveness supervisor evicts connections that stop
//! answering heartbeats.

pub mod connection;
pub mod envelope;
pub mod hub;
pub mod liveness;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod router;
pub mod topic;


pub use connection::{Connection, ConnectionId};
pub use envelope::{Envelope, EnvelopeBuilder, EventKind};
pub use hub::BroadcastHub;
pub use liveness::{LivenessReport, LivenessSupervisor};
pub use protocol::{ClientMessage, ControlReply};
pub use queue::{Enqueue, OutboundQueue};
pub use registry::ConnectionRegistry;
pub use router::{PublishReport, TopicRouter};
pub use topic::Topic;
