//! Client event protocol
//!
//! Both directions use a `{"type": ..., "data": {...}}` envelope carried as a
//! WebSocket text frame. Inbound frames decode into the closed `InboundEvent`
//! enumeration; outbound events serialize from `OutboundEvent`.

pub mod inbound;
pub mod outbound;

pub use inbound::{
    AudioChunk, ConversationStart, InboundEvent, ManualGenerate, MessageStart, ProtocolError,
    ResponseCountUpdate, ScenarioSupplement, SessionRef, UserModification, UserSelectedResponse,
};
pub use outbound::{ErrorCode, OutboundEvent};
