//! Put request and the request wrapper passed into
//! [`super::source::SourceHandler::start_transaction`].
//!
//! Kept as its own small type rather than inlining the fields directly into
//! `start_transaction`'s signature: a future Class-2 implementation needs to
//! accept other request kinds (e.g. a Cancel request) through the same entry
//! point.

#[cfg(feature = "alloc")]
use alloc::string::String;

use spacepackets::cfdp::{SegmentationControl, TransmissionMode};
use spacepackets::util::UnsignedByteField;

/// A request to copy a local file to a remote entity.
#[cfg(feature = "alloc")]
#[derive(Debug, Clone)]
pub struct PutRequestCfg {
    pub destination_id: UnsignedByteField,
    pub source_file: String,
    pub dest_file: String,
    /// Overrides `RemoteEntityCfg::default_transmission_mode` when set.
    pub trans_mode: Option<TransmissionMode>,
    /// Overrides `RemoteEntityCfg::closure_requested` when set.
    pub closure_requested: Option<bool>,
    pub seg_ctrl: SegmentationControl,
}

#[cfg(feature = "alloc")]
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub cfg: PutRequestCfg,
}

/// Discriminator for the handful of request kinds a Source handler can be
/// driven with. Only `Put` is implemented; the others are named so the type
/// already has room for Class-2 Cancel/Suspend/Resume requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfdpRequestType {
    Put,
    Cancel,
    Suspend,
    Resume,
}

/// Type-erased wrapper so `start_transaction` can take one parameter type
/// regardless of request kind.
#[cfg(feature = "alloc")]
#[derive(Debug, Clone)]
pub struct CfdpRequestWrapper {
    request: Option<PutRequest>,
}

#[cfg(feature = "alloc")]
impl CfdpRequestWrapper {
    pub fn new_put_request(request: PutRequest) -> Self {
        Self {
            request: Some(request),
        }
    }

    pub fn request_type(&self) -> Option<CfdpRequestType> {
        self.request.as_ref().map(|_| CfdpRequestType::Put)
    }

    pub fn to_put_request(&self) -> Option<&PutRequest> {
        self.request.as_ref()
    }
}
