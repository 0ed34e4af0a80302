//! Destination Handler FSM (C6): the Class-1 receive side of the Copy File
//! procedure. Accepts an inbound Metadata PDU, drains File-Data PDUs to the
//! virtual filestore by offset, verifies the EOF checksum, and emits a
//! Finished PDU when closure was requested.

#[cfg(feature = "alloc")]
use alloc::collections::BTreeSet;
#[cfg(feature = "alloc")]
use alloc::collections::VecDeque;
#[cfg(feature = "alloc")]
use alloc::string::String;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use spacepackets::cfdp::{ChecksumType, ConditionCode, TransmissionMode};

use super::checksum::{self, ChecksumError};
use super::filestore::{FilestoreError, VirtualFilestore};
use super::mib::{FaultCondition, LocalEntityCfg};
use super::pdu::{FinishedPduFields, PduConfig, PduHolder};
use super::user::{CfdpUser, DeliveryCode, FileSegmentRecvParams, FileStatus, MetadataRecvParams};
use super::{FaultHandlerAction, State, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStep {
    #[default]
    Idle,
    TransactionStart,
    ReceivingFileData,
    SendingAckPdu,
    TransferCompletion,
    SendingFinishedPdu,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DestStateWrapper {
    pub state: State,
    pub step: TransactionStep,
    pub packet_ready: bool,
}

#[cfg(feature = "alloc")]
#[derive(Debug, Clone, Default)]
struct DestFileParams {
    dest_file_name: String,
    crc32: u32,
    size: u64,
    /// Offsets already written this transaction, so a re-delivered File-Data
    /// PDU at the same offset can be logged instead of silently accepted.
    written_offsets: BTreeSet<u64>,
}

impl DestFileParams {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(feature = "alloc")]
#[derive(Debug)]
pub struct FsmResult<'a> {
    pub pdu_holder: &'a PduHolder,
    pub states: DestStateWrapper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestError {
    /// The handler received a second Metadata PDU while already processing a
    /// transaction.
    RecvdMetadataButIsBusy,
    /// The inbound Metadata PDU's source or destination file name was empty.
    EmptyFileNameField,
    /// `advance_fsm` called while a PDU is still awaiting confirmation.
    PacketSendNotConfirmed,
    ChecksumNotImplemented(ChecksumType),
    /// Metadata requested acknowledged mode; the ACK/NAK/Prompt/Keep-Alive
    /// machinery Class-2 needs is not implemented by this crate.
    ClassTwoNotImplemented,
    Filestore(FilestoreError),
}

impl From<FilestoreError> for DestError {
    fn from(value: FilestoreError) -> Self {
        DestError::Filestore(value)
    }
}

impl From<ChecksumError> for DestError {
    fn from(value: ChecksumError) -> Self {
        match value {
            ChecksumError::NotImplemented(t) => DestError::ChecksumNotImplemented(t),
            ChecksumError::Filestore(e) => DestError::Filestore(e),
        }
    }
}

#[cfg(feature = "std")]
impl core::fmt::Display for DestError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DestError::RecvdMetadataButIsBusy => write!(f, "received a metadata PDU while already busy with a transaction"),
            DestError::EmptyFileNameField => write!(f, "metadata PDU carried an empty source or destination file name"),
            DestError::PacketSendNotConfirmed => write!(f, "must confirm the current packet was sent before advancing"),
            DestError::ChecksumNotImplemented(t) => write!(f, "checksum type {t:?} not implemented"),
            DestError::ClassTwoNotImplemented => write!(f, "acknowledged mode is not implemented"),
            DestError::Filestore(e) => write!(f, "filestore error: {e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DestError {}

/// Class-1 receive side of the Copy File procedure.
#[cfg(feature = "alloc")]
pub struct DestinationHandler<V: VirtualFilestore, U: CfdpUser> {
    cfg: LocalEntityCfg,
    vfs: V,
    user: U,
    state: DestStateWrapper,
    transaction_id: Option<TransactionId>,
    pdu_conf: PduConfig,
    checksum_type: ChecksumType,
    closure_requested: bool,
    fp: DestFileParams,
    metadata_queue: VecDeque<super::pdu::MetadataPduFields>,
    file_data_queue: VecDeque<super::pdu::FileDataPduFields>,
    eof_queue: VecDeque<super::pdu::EofPduFields>,
    pdu_holder: PduHolder,
    completion_condition: ConditionCode,
    completion_delivery_code: DeliveryCode,
    completion_file_status: FileStatus,
}

#[cfg(feature = "alloc")]
impl<V: VirtualFilestore, U: CfdpUser> DestinationHandler<V, U> {
    pub fn new(cfg: LocalEntityCfg, vfs: V, user: U) -> Self {
        let pdu_conf = PduConfig::empty(cfg.local_entity_id);
        Self {
            cfg,
            vfs,
            user,
            state: DestStateWrapper::default(),
            transaction_id: None,
            pdu_conf,
            checksum_type: ChecksumType::Crc32,
            closure_requested: false,
            fp: DestFileParams::default(),
            metadata_queue: VecDeque::new(),
            file_data_queue: VecDeque::new(),
            eof_queue: VecDeque::new(),
            pdu_holder: PduHolder::Empty,
            completion_condition: ConditionCode::NoError,
            completion_delivery_code: DeliveryCode::DataComplete,
            completion_file_status: FileStatus::FileStatusUnreported,
        }
    }

    pub fn state(&self) -> State {
        self.state.state
    }

    pub fn step(&self) -> TransactionStep {
        self.state.step
    }

    pub fn pdu_holder(&self) -> &PduHolder {
        &self.pdu_holder
    }

    /// Gives the host access to the filestore it constructed the handler
    /// with, e.g. to inspect a written file after a transfer completes.
    pub fn vfs(&self) -> &V {
        &self.vfs
    }

    pub fn vfs_mut(&mut self) -> &mut V {
        &mut self.vfs
    }

    /// Gives the host access to the [`CfdpUser`] it constructed the handler
    /// with, e.g. to read back recorded indications.
    pub fn user(&self) -> &U {
        &self.user
    }

    pub fn user_mut(&mut self) -> &mut U {
        &mut self.user
    }

    /// Sorts an inbound PDU into the matching internal queue. File-Data PDUs
    /// go to the FIFO drained in `ReceivingFileData`; Metadata and EOF go to
    /// their own per-directive queues. Any other directive (ACK/NAK/Prompt/
    /// Keep-Alive/Finished) is outside what a Class-1-only destination needs
    /// and is dropped with a log warning.
    pub fn pass_packet(&mut self, pdu: PduHolder) {
        match pdu {
            PduHolder::FileData(fields) => self.file_data_queue.push_back(fields),
            PduHolder::Metadata(fields) => self.metadata_queue.push_back(fields),
            PduHolder::Eof(fields) => self.eof_queue.push_back(fields),
            PduHolder::Finished(_) | PduHolder::Empty => {
                log::warn!("destination handler dropped a PDU it does not consume");
            }
        }
    }

    pub fn confirm_packet_sent(&mut self) {
        self.state.packet_ready = false;
    }

    pub fn advance_fsm(&mut self) -> Result<(), DestError> {
        if self.state.packet_ready {
            return Err(DestError::PacketSendNotConfirmed);
        }
        if self.state.step == TransactionStep::SendingFinishedPdu {
            let tid = self.transaction_id.expect("set in transaction start");
            self.user.transaction_finished_indication(
                tid,
                self.completion_condition,
                self.completion_file_status,
                self.completion_delivery_code,
            );
            self.reset();
        }
        Ok(())
    }

    pub fn confirm_packet_sent_advance_fsm(&mut self) -> Result<(), DestError> {
        self.confirm_packet_sent();
        self.advance_fsm()
    }

    pub fn reset(&mut self) {
        if self.state.state != State::Idle {
            log::debug!("resetting destination handler out of state {:?}/{:?}", self.state.state, self.state.step);
        }
        self.state.step = TransactionStep::Idle;
        self.state.state = State::Idle;
        self.transaction_id = None;
        self.pdu_conf = PduConfig::empty(self.cfg.local_entity_id);
        self.checksum_type = ChecksumType::Crc32;
        self.closure_requested = false;
        self.fp.reset();
        self.pdu_holder = PduHolder::Empty;
    }

    pub fn state_machine(&mut self) -> Result<FsmResult<'_>, DestError> {
        if self.state.state == State::Idle {
            if let Some(metadata) = self.metadata_queue.pop_front() {
                self.start_transaction(metadata)?;
            } else {
                return Ok(FsmResult {
                    pdu_holder: &self.pdu_holder,
                    states: self.state,
                });
            }
        }
        if self.state.packet_ready {
            // A PDU is already awaiting host confirmation: calling the state
            // machine again before `confirm_packet_sent` is a no-op.
            return Ok(FsmResult {
                pdu_holder: &self.pdu_holder,
                states: self.state,
            });
        }
        if self.state.state == State::BusyClass2Acked {
            return Err(DestError::ClassTwoNotImplemented);
        }
        if self.state.step == TransactionStep::ReceivingFileData {
            self.receive_file_data()?;
        }
        if self.state.step == TransactionStep::TransferCompletion {
            self.checksum_verify()?;
            self.state.step = TransactionStep::SendingFinishedPdu;
        }
        if self.state.step == TransactionStep::SendingFinishedPdu {
            self.prepare_finished_pdu();
        }
        Ok(FsmResult {
            pdu_holder: &self.pdu_holder,
            states: self.state,
        })
    }

    fn start_transaction(&mut self, metadata: super::pdu::MetadataPduFields) -> Result<(), DestError> {
        if self.state.state != State::Idle {
            return Err(DestError::RecvdMetadataButIsBusy);
        }
        if metadata.source_file_name.is_empty() || metadata.dest_file_name.is_empty() {
            return Err(DestError::EmptyFileNameField);
        }
        self.state.step = TransactionStep::TransactionStart;
        self.state.state = match metadata.conf.trans_mode {
            TransmissionMode::Unacknowledged => State::BusyClass1Nacked,
            TransmissionMode::Acknowledged => State::BusyClass2Acked,
        };
        self.checksum_type = metadata.checksum_type;
        self.closure_requested = metadata.closure_requested;
        self.fp.dest_file_name = metadata.dest_file_name.clone();
        self.fp.size = metadata.file_size;
        self.pdu_conf = metadata.conf;
        let tid = TransactionId::new(metadata.conf.source_entity_id, metadata.conf.transaction_seq_num);
        self.transaction_id = Some(tid);
        self.state.step = TransactionStep::ReceivingFileData;

        let params = MetadataRecvParams {
            transaction_id: tid,
            source_id: metadata.conf.source_entity_id,
            file_size: metadata.file_size,
            source_file_name: &metadata.source_file_name,
            dest_file_name: &metadata.dest_file_name,
            msgs_to_user: metadata.msgs_to_user.iter().map(|(t, v)| (*t, v.as_slice())).collect(),
        };
        self.user.metadata_recv_indication(&params);
        Ok(())
    }

    fn receive_file_data(&mut self) -> Result<(), DestError> {
        let tid = self.transaction_id.expect("set in start_transaction");
        while let Some(segment) = self.file_data_queue.pop_front() {
            if self.cfg.indication_cfg.file_segment_recvd_indication_required {
                self.user.file_segment_recv_indication(&FileSegmentRecvParams {
                    transaction_id: tid,
                    offset: segment.offset,
                    length: segment.file_data.len(),
                });
            }
            if !self.fp.written_offsets.insert(segment.offset) {
                log::warn!(
                    "duplicate file-data PDU at offset {} for transaction {:?}, overwriting",
                    segment.offset,
                    tid
                );
            }
            self.vfs
                .write_data(&self.fp.dest_file_name, &segment.file_data, segment.offset)?;
        }
        while let Some(eof) = self.eof_queue.pop_front() {
            if eof.condition_code == ConditionCode::NoError {
                self.fp.crc32 = eof.file_checksum;
                self.fp.size = eof.file_size;
                if self.cfg.indication_cfg.eof_recv_indication_required {
                    self.user.eof_recv_indication(tid);
                }
                self.state.step = match self.state.state {
                    State::BusyClass1Nacked => TransactionStep::TransferCompletion,
                    State::BusyClass2Acked => TransactionStep::SendingAckPdu,
                    State::Idle => TransactionStep::TransferCompletion,
                };
                break;
            }
            // Faulted EOF: consult the fault handler map instead of silently
            // dropping the condition code.
            if let Some(condition) = FaultCondition::from_condition_code(eof.condition_code) {
                self.user.fault_indication(tid, condition);
                match self.cfg.fault_handler_action(condition) {
                    FaultHandlerAction::Abandon => {
                        log::warn!("abandoning transaction {:?} on faulted EOF {:?}", tid, eof.condition_code);
                        self.reset();
                        return Ok(());
                    }
                    FaultHandlerAction::Ignore
                    | FaultHandlerAction::NoticeOfCancellation
                    | FaultHandlerAction::NoticeOfSuspension => {
                        self.completion_condition = eof.condition_code;
                        self.completion_delivery_code = DeliveryCode::DataIncomplete;
                        self.completion_file_status = FileStatus::FileRetained;
                        self.state.step = TransactionStep::SendingFinishedPdu;
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn checksum_verify(&mut self) -> Result<(), DestError> {
        let size = self.vfs.stat_size(&self.fp.dest_file_name)?;
        let mut file = self.vfs.open_file(&self.fp.dest_file_name)?;
        let recomputed = checksum::calc_file_checksum(
            &self.vfs,
            &mut file,
            self.checksum_type,
            size,
            4096,
        )?;
        if recomputed == self.fp.crc32 {
            self.completion_condition = ConditionCode::NoError;
            self.completion_delivery_code = DeliveryCode::DataComplete;
            self.completion_file_status = FileStatus::FileRetained;
        } else {
            self.completion_condition = ConditionCode::FileChecksumFailure;
            self.completion_delivery_code = DeliveryCode::DataIncomplete;
            self.completion_file_status = FileStatus::FileRetained;
        }
        Ok(())
    }

    fn prepare_finished_pdu(&mut self) {
        if self.closure_requested {
            self.pdu_holder = PduHolder::Finished(FinishedPduFields {
                conf: self.pdu_conf,
                condition_code: self.completion_condition,
                delivery_code: self.completion_delivery_code,
                file_status: self.completion_file_status,
            });
            self.state.packet_ready = true;
        } else {
            let tid = self.transaction_id.expect("set in start_transaction");
            self.user.transaction_finished_indication(
                tid,
                self.completion_condition,
                self.completion_file_status,
                self.completion_delivery_code,
            );
            self.reset();
        }
    }
}
