//! Management Information Base (MIB): local and remote entity configuration.
//!
//! Both handlers are parameterised explicitly by a [`LocalEntityCfg`] and a
//! [`RemoteEntityCfg`] passed in by the host. There is deliberately no
//! process-wide configuration registry or global singleton: MIB state lives
//! exactly where the host puts it and is handed to each handler at
//! construction time.

#[cfg(feature = "alloc")]
use alloc::collections::BTreeMap;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use spacepackets::cfdp::{ChecksumType, TransmissionMode};
use spacepackets::util::UnsignedByteField;

use super::FaultHandlerAction;

/// Gates the optional user indications a [`LocalEntityCfg`] enables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalIndicationCfg {
    pub eof_sent_indication_required: bool,
    pub eof_recv_indication_required: bool,
    pub file_segment_recvd_indication_required: bool,
    pub transaction_finished_indication_required: bool,
    pub suspended_indication_required: bool,
    pub resumed_indication_required: bool,
}

impl LocalIndicationCfg {
    /// All indications enabled, useful for tests and interactive tools.
    pub fn all() -> Self {
        Self {
            eof_sent_indication_required: true,
            eof_recv_indication_required: true,
            file_segment_recvd_indication_required: true,
            transaction_finished_indication_required: true,
            suspended_indication_required: true,
            resumed_indication_required: true,
        }
    }
}

/// Condition codes a fault handler entry can be registered against.
///
/// Kept separate from `spacepackets::cfdp::ConditionCode` so the map can be
/// built with `#[derive(Default)]` friendly keys without requiring that type
/// to implement `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FaultCondition {
    PositiveAckLimitReached,
    KeepAliveLimitReached,
    InvalidTransmissionMode,
    FilestoreRejection,
    FileChecksumFailure,
    FileSizeError,
    NakLimitReached,
    InactivityDetected,
    CheckLimitReached,
    UnsupportedChecksumType,
}

impl FaultCondition {
    /// Maps a wire [`spacepackets::cfdp::ConditionCode`] to the
    /// corresponding fault condition, if it is one a fault handler entry can
    /// be registered against. `NoError` and codes without a fault-handler
    /// equivalent (e.g. reserved values) map to `None`.
    pub fn from_condition_code(code: spacepackets::cfdp::ConditionCode) -> Option<Self> {
        use spacepackets::cfdp::ConditionCode;
        match code {
            ConditionCode::PositiveAckLimitReached => Some(Self::PositiveAckLimitReached),
            ConditionCode::KeepAliveLimitReached => Some(Self::KeepAliveLimitReached),
            ConditionCode::InvalidTransmissionMode => Some(Self::InvalidTransmissionMode),
            ConditionCode::FilestoreRejection => Some(Self::FilestoreRejection),
            ConditionCode::FileChecksumFailure => Some(Self::FileChecksumFailure),
            ConditionCode::FileSizeError => Some(Self::FileSizeError),
            ConditionCode::NakLimitReached => Some(Self::NakLimitReached),
            ConditionCode::InactivityDetected => Some(Self::InactivityDetected),
            ConditionCode::CheckLimitReached => Some(Self::CheckLimitReached),
            ConditionCode::UnsupportedChecksumType => Some(Self::UnsupportedChecksumType),
            _ => None,
        }
    }
}

/// Local CFDP entity configuration: this entity's id, which indications are
/// wired up, and the default fault handler action per fault condition.
#[derive(Debug, Clone)]
pub struct LocalEntityCfg {
    pub local_entity_id: UnsignedByteField,
    pub indication_cfg: LocalIndicationCfg,
    #[cfg(feature = "alloc")]
    pub default_fault_handlers: BTreeMap<FaultCondition, FaultHandlerAction>,
}

impl LocalEntityCfg {
    #[cfg(feature = "alloc")]
    pub fn new(local_entity_id: UnsignedByteField, indication_cfg: LocalIndicationCfg) -> Self {
        Self {
            local_entity_id,
            indication_cfg,
            default_fault_handlers: BTreeMap::new(),
        }
    }

    /// Looks up the configured action for `condition`, defaulting to
    /// [`FaultHandlerAction::Ignore`] if no entry was registered.
    #[cfg(feature = "alloc")]
    pub fn fault_handler_action(&self, condition: FaultCondition) -> FaultHandlerAction {
        self.default_fault_handlers
            .get(&condition)
            .copied()
            .unwrap_or(FaultHandlerAction::Ignore)
    }
}

/// Per-remote-entity configuration negotiated out of band (MIB provisioning
/// is out of this crate's scope; the host builds these).
///
/// Invariant: `max_file_segment_len >= 1`.
#[derive(Debug, Clone, Copy)]
pub struct RemoteEntityCfg {
    pub remote_entity_id: UnsignedByteField,
    pub max_file_segment_len: usize,
    pub crc_on_transmission: bool,
    pub crc_type: ChecksumType,
    pub default_transmission_mode: TransmissionMode,
    pub closure_requested: bool,
}

#[cfg(feature = "alloc")]
#[derive(Debug, Default)]
pub struct RemoteEntityTable {
    entries: Vec<RemoteEntityCfg>,
}

#[cfg(feature = "alloc")]
impl RemoteEntityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `cfg`, returning `false` without modifying the table if
    /// `cfg.remote_entity_id` is already present.
    pub fn add_remote_entity(&mut self, cfg: RemoteEntityCfg) -> bool {
        if self.get_remote_entity(cfg.remote_entity_id).is_some() {
            return false;
        }
        self.entries.push(cfg);
        true
    }

    pub fn get_remote_entity(&self, remote_entity_id: UnsignedByteField) -> Option<&RemoteEntityCfg> {
        self.entries
            .iter()
            .find(|e| e.remote_entity_id == remote_entity_id)
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;
    use spacepackets::cfdp::ChecksumType;
    use spacepackets::util::UnsignedByteFieldU8;

    fn dummy_cfg(id: u8) -> RemoteEntityCfg {
        RemoteEntityCfg {
            remote_entity_id: UnsignedByteFieldU8::new(id).into(),
            max_file_segment_len: 1024,
            crc_on_transmission: false,
            crc_type: ChecksumType::Crc32,
            default_transmission_mode: TransmissionMode::Unacknowledged,
            closure_requested: false,
        }
    }

    #[test]
    fn add_and_lookup() {
        let mut table = RemoteEntityTable::new();
        assert!(table.add_remote_entity(dummy_cfg(1)));
        assert!(table
            .get_remote_entity(UnsignedByteFieldU8::new(1).into())
            .is_some());
    }

    #[test]
    fn duplicate_add_rejected() {
        let mut table = RemoteEntityTable::new();
        assert!(table.add_remote_entity(dummy_cfg(2)));
        assert!(!table.add_remote_entity(dummy_cfg(2)));
    }

    #[test]
    fn unknown_fault_condition_defaults_to_ignore() {
        let cfg = LocalEntityCfg::new(UnsignedByteFieldU8::new(0).into(), LocalIndicationCfg::all());
        assert_eq!(
            cfg.fault_handler_action(FaultCondition::FileChecksumFailure),
            FaultHandlerAction::Ignore
        );
    }

    #[test]
    fn no_error_does_not_map_to_a_fault_condition() {
        assert_eq!(
            FaultCondition::from_condition_code(spacepackets::cfdp::ConditionCode::NoError),
            None
        );
    }

    #[test]
    fn checksum_failure_maps_to_fault_condition() {
        assert_eq!(
            FaultCondition::from_condition_code(spacepackets::cfdp::ConditionCode::FileChecksumFailure),
            Some(FaultCondition::FileChecksumFailure)
        );
    }
}
