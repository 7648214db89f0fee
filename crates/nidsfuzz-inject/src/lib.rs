//! Tunable bilateral injection: port allocation, the tuning wire protocol,
//! the broker that correlates control and data channels, and the
//! initiator/responder halves.

pub mod broker;
pub mod initiator;
pub mod message;
pub mod port_allocator;
pub mod responder;

pub use broker::MessageBroker;
pub use initiator::Initiator;
pub use message::{MessageReceiver, Opcode, TuningMessage};
pub use port_allocator::PortAllocator;
pub use responder::Responder;
