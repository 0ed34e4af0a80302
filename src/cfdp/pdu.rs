//! PDU holder and shared PDU header config (C4).
//!
//! `PduHolder` is a tagged union carrying at most one decoded PDU; callers
//! narrow to the variant they expect via `as_*` accessors instead of
//! downcasting. Encoding a held PDU to wire bytes, and decoding inbound bytes
//! back into one of these variants, both happen on the host side with
//! `spacepackets`'s own wire PDU types -- this crate only carries the decoded
//! field values a Source/Destination handler actually reads or writes, since
//! byte-level framing is out of scope (see the crate's module documentation).

#[cfg(feature = "alloc")]
use alloc::string::String;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use spacepackets::cfdp::{ChecksumType, ConditionCode, Direction, SegmentationControl, TlvType, TransmissionMode};
use spacepackets::cfdp::pdu::FileDirectiveType;
use spacepackets::util::UnsignedByteField;

use super::user::{DeliveryCode, FileStatus};

/// Shared PDU header fields every concrete PDU in a transaction is stamped
/// with. Built once per transaction and cloned into each emitted PDU.
#[derive(Debug, Clone, Copy)]
pub struct PduConfig {
    pub source_entity_id: UnsignedByteField,
    pub dest_entity_id: UnsignedByteField,
    pub transaction_seq_num: UnsignedByteField,
    pub trans_mode: TransmissionMode,
    pub crc_flag: bool,
    pub direction: Direction,
    pub seg_ctrl: SegmentationControl,
}

impl PduConfig {
    /// A config with only `source_entity_id` set meaningfully; every other
    /// field is a placeholder overwritten once the transaction parameters
    /// (destination, transmission mode, direction) are known.
    pub fn empty(source_entity_id: UnsignedByteField) -> Self {
        Self {
            source_entity_id,
            dest_entity_id: source_entity_id,
            transaction_seq_num: source_entity_id,
            trans_mode: TransmissionMode::Unacknowledged,
            crc_flag: false,
            direction: Direction::TowardsReceiver,
            seg_ctrl: SegmentationControl::NoRecordBoundaryPreservation,
        }
    }
}

#[cfg(feature = "alloc")]
#[derive(Debug, Clone)]
pub struct MetadataPduFields {
    pub conf: PduConfig,
    pub closure_requested: bool,
    pub checksum_type: ChecksumType,
    pub file_size: u64,
    pub source_file_name: String,
    pub dest_file_name: String,
    pub msgs_to_user: Vec<(TlvType, Vec<u8>)>,
}

#[cfg(feature = "alloc")]
#[derive(Debug, Clone)]
pub struct FileDataPduFields {
    pub conf: PduConfig,
    pub offset: u64,
    pub file_data: Vec<u8>,
    pub segment_metadata_flag: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct EofPduFields {
    pub conf: PduConfig,
    pub condition_code: ConditionCode,
    pub file_checksum: u32,
    pub file_size: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct FinishedPduFields {
    pub conf: PduConfig,
    pub condition_code: ConditionCode,
    pub delivery_code: DeliveryCode,
    pub file_status: FileStatus,
}

/// Tagged container carrying at most one decoded PDU.
#[cfg(feature = "alloc")]
#[derive(Debug, Clone)]
pub enum PduHolder {
    Empty,
    Metadata(MetadataPduFields),
    FileData(FileDataPduFields),
    Eof(EofPduFields),
    Finished(FinishedPduFields),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduHolderTypeMismatch;

#[cfg(feature = "std")]
impl core::fmt::Display for PduHolderTypeMismatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PDU holder did not contain the requested variant")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PduHolderTypeMismatch {}

#[cfg(feature = "alloc")]
impl Default for PduHolder {
    fn default() -> Self {
        PduHolder::Empty
    }
}

#[cfg(feature = "alloc")]
impl PduHolder {
    pub fn is_empty(&self) -> bool {
        matches!(self, PduHolder::Empty)
    }

    /// True for every variant but `FileData`, matching
    /// `spacepackets.cfdp.pdu.helper.PduHolder.is_file_directive`.
    pub fn is_file_directive(&self) -> bool {
        !matches!(self, PduHolder::Empty | PduHolder::FileData(_))
    }

    /// The directive type of the held PDU, for every file-directive variant.
    /// `None` for `FileData` (not a directive) and `Empty`.
    pub fn pdu_directive_type(&self) -> Option<FileDirectiveType> {
        match self {
            PduHolder::Empty | PduHolder::FileData(_) => None,
            PduHolder::Metadata(_) => Some(FileDirectiveType::MetadataPdu),
            PduHolder::Eof(_) => Some(FileDirectiveType::EofPdu),
            PduHolder::Finished(_) => Some(FileDirectiveType::FinishedPdu),
        }
    }

    pub fn as_metadata(&self) -> Result<&MetadataPduFields, PduHolderTypeMismatch> {
        match self {
            PduHolder::Metadata(m) => Ok(m),
            _ => Err(PduHolderTypeMismatch),
        }
    }

    pub fn as_file_data(&self) -> Result<&FileDataPduFields, PduHolderTypeMismatch> {
        match self {
            PduHolder::FileData(f) => Ok(f),
            _ => Err(PduHolderTypeMismatch),
        }
    }

    pub fn as_eof(&self) -> Result<&EofPduFields, PduHolderTypeMismatch> {
        match self {
            PduHolder::Eof(e) => Ok(e),
            _ => Err(PduHolderTypeMismatch),
        }
    }

    pub fn as_finished(&self) -> Result<&FinishedPduFields, PduHolderTypeMismatch> {
        match self {
            PduHolder::Finished(f) => Ok(f),
            _ => Err(PduHolderTypeMismatch),
        }
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;
    use spacepackets::util::UnsignedByteFieldU8;

    #[test]
    fn empty_holder_rejects_narrowing() {
        let holder = PduHolder::default();
        assert!(holder.is_empty());
        assert!(holder.as_eof().is_err());
    }

    #[test]
    fn narrowing_succeeds_for_matching_variant() {
        let conf = PduConfig::empty(UnsignedByteFieldU8::new(1).into());
        let holder = PduHolder::Eof(EofPduFields {
            conf,
            condition_code: ConditionCode::NoError,
            file_checksum: 0,
            file_size: 0,
        });
        assert!(holder.is_file_directive());
        assert!(holder.as_eof().is_ok());
        assert!(holder.as_metadata().is_err());
        assert_eq!(holder.pdu_directive_type(), Some(FileDirectiveType::EofPdu));
    }

    #[test]
    fn file_data_and_empty_have_no_directive_type() {
        let conf = PduConfig::empty(UnsignedByteFieldU8::new(1).into());
        let file_data = PduHolder::FileData(FileDataPduFields {
            conf,
            offset: 0,
            file_data: alloc::vec::Vec::new(),
            segment_metadata_flag: false,
        });
        assert_eq!(file_data.pdu_directive_type(), None);
        assert_eq!(PduHolder::default().pdu_directive_type(), None);
    }
}
