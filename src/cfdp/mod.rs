//! # CFDP Copy File procedure
//!
//! This module and its children implement the sending and receiving halves of
//! the CFDP Copy File procedure as specified by CCSDS 727.0-B-5. It is split
//! into the [`source`] and [`dest`] finite-state machines, the [`mib`]
//! (Management Information Base) configuration types both machines are
//! parameterised with, the [`filestore`] abstraction used for all file I/O,
//! the [`user`] indication callback surface, a [`seq_count`] transaction
//! sequence number provider and a [`checksum`] service.
//!
//! Only Class-1 (Unacknowledged) mode is implemented. The [`State`] and
//! [`dest::TransactionStep`]/[`source::SourceTransactionStep`] enums already
//! carry the Class-2 (Acknowledged) variants so that a future implementation
//! can be added without breaking callers, but any attempt to drive a Class-2
//! transaction currently returns an error rather than silently doing nothing.

pub mod checksum;
pub mod dest;
pub mod filestore;
pub mod mib;
pub mod pdu;
pub mod request;
pub mod seq_count;
pub mod source;
pub mod user;

use spacepackets::util::UnsignedByteField;

/// Busy/idle state shared by the source and destination handlers.
///
/// Invariant: `state == State::Idle` iff the handler's transaction step is
/// also idle. Neither handler constructs `BusyClass2Acked` today; it exists
/// so the state space already admits Class-2 mode.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum State {
    #[default]
    Idle,
    BusyClass1Nacked,
    BusyClass2Acked,
}

/// Unique identifier of a CFDP transaction: the pair of the source entity id
/// and the transaction sequence number assigned by that entity.
///
/// Two ids compare equal iff both fields match. Created when a handler enters
/// `TransactionStart`, used in every user indication for that transaction,
/// and dropped when the handler is reset.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct TransactionId {
    source_entity_id: UnsignedByteField,
    transaction_seq_num: UnsignedByteField,
}

impl TransactionId {
    pub fn new(source_entity_id: UnsignedByteField, transaction_seq_num: UnsignedByteField) -> Self {
        Self {
            source_entity_id,
            transaction_seq_num,
        }
    }

    pub fn source_entity_id(&self) -> UnsignedByteField {
        self.source_entity_id
    }

    pub fn transaction_seq_num(&self) -> UnsignedByteField {
        self.transaction_seq_num
    }
}

/// Action a fault handler takes in response to a fault condition code.
///
/// Modeled after CCSDS 727.0-B-5 section 4.8.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FaultHandlerAction {
    Ignore,
    NoticeOfCancellation,
    NoticeOfSuspension,
    Abandon,
}

#[cfg(test)]
mod tests {
    use super::*;
    use spacepackets::util::UnsignedByteFieldU8;

    #[test]
    fn transaction_id_equality() {
        let a = TransactionId::new(
            UnsignedByteFieldU8::new(1).into(),
            UnsignedByteFieldU8::new(5).into(),
        );
        let b = TransactionId::new(
            UnsignedByteFieldU8::new(1).into(),
            UnsignedByteFieldU8::new(5).into(),
        );
        let c = TransactionId::new(
            UnsignedByteFieldU8::new(1).into(),
            UnsignedByteFieldU8::new(6).into(),
        );
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn default_state_is_idle() {
        assert_eq!(State::default(), State::Idle);
    }
}
