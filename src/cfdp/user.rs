//! User indication interface (C3): the one-way callback surface through
//! which the Source and Destination handlers report transaction lifecycle
//! events.
//!
//! Indications are synchronous upcalls raised inline from `state_machine()`;
//! implementations must not block.

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use spacepackets::cfdp::{ConditionCode, TlvType};
use spacepackets::util::UnsignedByteField;

use super::mib::FaultCondition;
use super::TransactionId;

/// Outcome reported in a `transaction_finished_indication`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryCode {
    DataComplete,
    DataIncomplete,
}

/// Final disposition of the destination file, as reported alongside
/// [`DeliveryCode`]. `FileStatusUnreported` is what the Source side reports,
/// since it never inspects the destination filestore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    DiscardedDeliberately,
    DiscardedFilestoreRejection,
    FileRetained,
    FileStatusUnreported,
}

/// Parameters accompanying `metadata_recv_indication`.
#[derive(Debug, Clone)]
pub struct MetadataRecvParams<'a> {
    pub transaction_id: TransactionId,
    pub source_id: UnsignedByteField,
    pub file_size: u64,
    pub source_file_name: &'a str,
    pub dest_file_name: &'a str,
    #[cfg(feature = "alloc")]
    pub msgs_to_user: Vec<(TlvType, &'a [u8])>,
}

/// Parameters accompanying `file_segment_recv_indication`.
#[derive(Debug, Clone, Copy)]
pub struct FileSegmentRecvParams {
    pub transaction_id: TransactionId,
    pub offset: u64,
    pub length: usize,
}

/// Callback surface both handlers raise indications through.
///
/// The Python original's `CfdpUserBase` also bundles the transaction's
/// `VirtualFilestore` onto this same object. The handlers here take the
/// filestore as its own constructor parameter instead, so a filestore
/// implementation does not have to also implement every indication method.
pub trait CfdpUser {
    fn transaction_indication(&mut self, id: TransactionId);
    fn eof_sent_indication(&mut self, id: TransactionId);
    fn eof_recv_indication(&mut self, id: TransactionId);
    fn transaction_finished_indication(
        &mut self,
        id: TransactionId,
        condition_code: ConditionCode,
        file_status: FileStatus,
        delivery_code: DeliveryCode,
    );
    fn metadata_recv_indication(&mut self, params: &MetadataRecvParams);
    fn file_segment_recv_indication(&mut self, params: &FileSegmentRecvParams);
    /// Raised when a fault handler action resolves to
    /// [`super::FaultHandlerAction::NoticeOfSuspension`] or
    /// [`super::FaultHandlerAction::NoticeOfCancellation`]; not exercised by
    /// the Class-1 code paths today but kept so hosts can already wire up
    /// logging/alerting for it.
    fn fault_indication(&mut self, id: TransactionId, condition: FaultCondition) {
        let _ = (id, condition);
    }
}
