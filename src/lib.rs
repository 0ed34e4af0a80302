//! # CFDP Copy File engine
//!
//! This crate implements the core finite-state machines of the CCSDS File
//! Delivery Protocol (CFDP, CCSDS 727.0-B-5) Copy File procedure: a
//! [`cfdp::source::SourceHandler`] which turns a put request into a stream of
//! Metadata / File-Data / EOF PDUs, and a [`cfdp::dest::DestinationHandler`]
//! which consumes that stream and writes the file to a virtual filestore.
//!
//! PDU encoding and decoding is delegated to the [`spacepackets`] crate; this
//! crate never puts bytes on a wire itself. The surrounding application is
//! responsible for transporting the PDUs produced by [`cfdp::source`] to the
//! [`cfdp::dest`] side and back.
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod cfdp;
