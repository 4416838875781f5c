//! # Signal Kinds and Reference Generation
//!
//! Downstream systems identify every scalar signal by a stable string
//! reference of the form `<adapterName>!IS-<code>` for singleton signals
//! and `<adapterName>!IS-<code><ordinal>` (1-based ordinal) for
//! positionally-indexed ones. Reference generation runs for every value of
//! every data frame, potentially tens of thousands of times per second, so
//! the formatted strings are memoized per kind in `SignalReferenceCache`.
//!
//! The cache stores a tagged entry per kind: a single slot for scalar use,
//! or a fixed-length array for indexed use. An indexed array whose length
//! no longer matches the device's current signal count is discarded and
//! replaced whole, which keeps the cache consistent across configuration
//! changes that alter signal counts.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Semantic role of one sample inside a data cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Status,
    Angle,
    Magnitude,
    Frequency,
    DfDt,
    Analog,
    Digital,
    Quality,
    Calculation,
    Statistic,
}

impl SignalKind {
    /// One-or-two-letter reference tag for this kind.
    pub fn code(self) -> &'static str {
        match self {
            SignalKind::Status => "SF",
            SignalKind::Angle => "PA",
            SignalKind::Magnitude => "PM",
            SignalKind::Frequency => "FQ",
            SignalKind::DfDt => "DF",
            SignalKind::Analog => "AV",
            SignalKind::Digital => "DV",
            SignalKind::Quality => "QF",
            SignalKind::Calculation => "CV",
            SignalKind::Statistic => "ST",
        }
    }

    /// Inverse of [`SignalKind::code`].
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "SF" => Some(SignalKind::Status),
            "PA" => Some(SignalKind::Angle),
            "PM" => Some(SignalKind::Magnitude),
            "FQ" => Some(SignalKind::Frequency),
            "DF" => Some(SignalKind::DfDt),
            "AV" => Some(SignalKind::Analog),
            "DV" => Some(SignalKind::Digital),
            "QF" => Some(SignalKind::Quality),
            "CV" => Some(SignalKind::Calculation),
            "ST" => Some(SignalKind::Statistic),
            _ => None,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Raised when an indexed reference is requested past the end of its
/// configured array.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("signal index {index} out of range for {kind} array of {count}")]
pub struct SignalIndexError {
    pub kind: SignalKind,
    pub index: usize,
    pub count: usize,
}

/// Deterministic signal-reference string synthesis.
pub struct SignalReference;

impl SignalReference {
    /// Reference for a singleton signal: `<adapterName>!IS-<code>`.
    pub fn encode(adapter_name: &str, kind: SignalKind) -> String {
        format!("{}!IS-{}", adapter_name, kind.code())
    }

    /// Reference for an indexed signal: `<adapterName>!IS-<code><ordinal>`
    /// where the ordinal is `index + 1`.
    pub fn encode_indexed(adapter_name: &str, kind: SignalKind, index: usize) -> String {
        format!("{}!IS-{}{}", adapter_name, kind.code(), index + 1)
    }
}

enum CachedReference {
    Scalar(String),
    Indexed(Vec<Option<String>>),
}

/// Memoizes generated signal-reference strings per kind.
pub struct SignalReferenceCache {
    adapter_name: String,
    entries: HashMap<SignalKind, CachedReference>,
}

impl SignalReferenceCache {
    pub fn new(adapter_name: impl Into<String>) -> Self {
        SignalReferenceCache {
            adapter_name: adapter_name.into(),
            entries: HashMap::new(),
        }
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Cached reference for a singleton signal, synthesizing on first use.
    pub fn scalar(&mut self, kind: SignalKind) -> &str {
        if !matches!(self.entries.get(&kind), Some(CachedReference::Scalar(_))) {
            let reference = SignalReference::encode(&self.adapter_name, kind);
            self.entries.insert(kind, CachedReference::Scalar(reference));
        }
        match &self.entries[&kind] {
            CachedReference::Scalar(reference) => reference,
            CachedReference::Indexed(_) => unreachable!("scalar slot just ensured"),
        }
    }

    /// Cached reference for position `index` of an indexed signal array of
    /// length `count`, synthesizing only that slot on first access.
    ///
    /// A cached array whose length differs from `count` is discarded and
    /// replaced whole before the slot is served.
    pub fn indexed(
        &mut self,
        kind: SignalKind,
        index: usize,
        count: usize,
    ) -> Result<&str, SignalIndexError> {
        if index >= count {
            return Err(SignalIndexError { kind, index, count });
        }

        let rebuild = match self.entries.get(&kind) {
            Some(CachedReference::Indexed(slots)) => slots.len() != count,
            _ => true,
        };
        if rebuild {
            self.entries
                .insert(kind, CachedReference::Indexed(vec![None; count]));
        }

        match self.entries.get_mut(&kind) {
            Some(CachedReference::Indexed(slots)) => {
                let slot = &mut slots[index];
                if slot.is_none() {
                    *slot = Some(SignalReference::encode_indexed(
                        &self.adapter_name,
                        kind,
                        index,
                    ));
                }
                match slot {
                    Some(reference) => Ok(reference),
                    None => unreachable!("slot just filled"),
                }
            }
            _ => unreachable!("indexed slot just ensured"),
        }
    }

    /// Drops every cached entry; references resynthesize on next use.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
