//! Core packet and flow types shared by every stage

pub mod flow;
pub mod packet;

pub use flow::{CompletionReason, Flow, FlowKey};
pub use packet::{Direction, IpProtocol, PacketMeta, TcpFlags, TcpMeta};
