//! ICE candidate wire encoding.
//!
//! Candidates travel as `sdpMid$sdpMLineIndex$sdp`. There is no escaping, so
//! the delimiter may never appear inside `sdp_mid` or `sdp`; encoding refuses
//! such candidates instead of producing a string the peer would split wrongly.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Reserved separator between the three candidate fields.
pub const ICE_SEPARATOR: char = '$';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IceCandidateError {
    #[error("expected 3 fields separated by '$', found {0}")]
    FieldCount(usize),

    #[error("invalid sdpMLineIndex: {0}")]
    InvalidMLineIndex(#[from] ParseIntError),

    #[error("field {0} contains the reserved separator '$'")]
    DelimiterInField(&'static str),
}

/// A single ICE candidate as exchanged over signaling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IceCandidateRecord {
    pub sdp_mid: String,
    pub sdp_mline_index: u16,
    pub sdp: String,
}

impl IceCandidateRecord {
    pub fn new(sdp_mid: impl Into<String>, sdp_mline_index: u16, sdp: impl Into<String>) -> Self {
        Self {
            sdp_mid: sdp_mid.into(),
            sdp_mline_index,
            sdp: sdp.into(),
        }
    }

    pub fn encode(&self) -> Result<String, IceCandidateError> {
        if self.sdp_mid.contains(ICE_SEPARATOR) {
            return Err(IceCandidateError::DelimiterInField("sdpMid"));
        }
        if self.sdp.contains(ICE_SEPARATOR) {
            return Err(IceCandidateError::DelimiterInField("sdp"));
        }
        Ok(format!(
            "{}{ICE_SEPARATOR}{}{ICE_SEPARATOR}{}",
            self.sdp_mid, self.sdp_mline_index, self.sdp
        ))
    }

    pub fn decode(payload: &str) -> Result<Self, IceCandidateError> {
        let fields: Vec<&str> = payload.split(ICE_SEPARATOR).collect();
        let [sdp_mid, index, sdp] = fields.as_slice() else {
            return Err(IceCandidateError::FieldCount(fields.len()));
        };
        Ok(Self {
            sdp_mid: (*sdp_mid).to_string(),
            sdp_mline_index: index.parse()?,
            sdp: (*sdp).to_string(),
        })
    }
}

impl FromStr for IceCandidateRecord {
    type Err = IceCandidateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl fmt::Display for IceCandidateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidate(mid={:?}, mline={}, {:?})",
            self.sdp_mid, self.sdp_mline_index, self.sdp
        )
    }
}
