//! EMV sub-parsers (C3): pure functions over already-extracted tag values.
//!
//! Each parser is a `TryFrom<&[u8]>` (or similarly shaped free function)
//! that never panics and reports malformed input through a typed error,
//! following the teacher's `emv.rs` convention.

pub mod afl;
pub mod aip;
pub mod cid;
pub mod cvm;
pub mod dol;
pub mod numeric;
pub mod roca;

pub use afl::{AflEntry, AflError};
pub use aip::AipCapabilities;
pub use cid::{AcType, Cid};
pub use cvm::{CvRule, CvmList, CvmMethod};
pub use dol::{DolEntry, DolError};
pub use roca::{RocaConfidence, RocaFinding};
