//! Resolver results and the per-scope state record.

use serde::{Deserialize, Serialize};

use crate::tuple::{pack, unpack, DecodeError, Element};

/// Outcome of resolving a key: the interned value and its metadata.
///
/// The value is immutable once created; metadata changes only through
/// `update_metadata_and_version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolverResult {
    value: u64,
    metadata: Option<Vec<u8>>,
}

impl ResolverResult {
    /// Build a result from its parts.
    #[must_use]
    pub const fn new(value: u64, metadata: Option<Vec<u8>>) -> Self {
        Self { value, metadata }
    }

    /// The interned integer value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.value
    }

    /// The metadata stored alongside the entry at creation, if any.
    #[must_use]
    pub fn metadata(&self) -> Option<&[u8]> {
        self.metadata.as_deref()
    }

    /// Encode as the forward-mapping value: `(value, metadata | nil)`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let meta = match &self.metadata {
            Some(bytes) => Element::Bytes(bytes.clone()),
            None => Element::Nil,
        };
        pack(&[Element::U64(self.value), meta])
    }

    /// Decode a forward-mapping value.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let elements = unpack(buf)?;
        match elements.as_slice() {
            [Element::U64(value), Element::Nil] => Ok(Self::new(*value, None)),
            [Element::U64(value), Element::Bytes(meta)] => {
                Ok(Self::new(*value, Some(meta.clone())))
            }
            _ => Err(DecodeError {
                offset: 0,
                detail: "forward entry is not (integer, bytes|nil)",
            }),
        }
    }
}

/// Write availability of a scope.
///
/// `Unlocked ↔ WriteLocked` via enable/disable; `Unlocked → Retired` is
/// terminal. In any non-`Unlocked` state creates fail and reads succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockState {
    Unlocked,
    WriteLocked,
    Retired,
}

impl LockState {
    /// The bit-stable wire value.
    #[must_use]
    pub const fn wire(self) -> u64 {
        match self {
            Self::Unlocked => 0,
            Self::WriteLocked => 1,
            Self::Retired => 2,
        }
    }

    /// Decode a wire value; unknown values are a decode error.
    #[must_use]
    pub const fn from_wire(wire: u64) -> Option<Self> {
        match wire {
            0 => Some(Self::Unlocked),
            1 => Some(Self::WriteLocked),
            2 => Some(Self::Retired),
            _ => None,
        }
    }

    /// Whether create paths are allowed in this state.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Unlocked)
    }
}

/// The single per-scope state record.
///
/// `version` advances on every admin mutation and bounds cache staleness
/// across processes; `window_high` is the floor below which the allocator
/// never assigns new values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverState {
    pub version: u32,
    pub lock: LockState,
    pub window_high: u64,
}

impl Default for ResolverState {
    fn default() -> Self {
        Self {
            version: 0,
            lock: LockState::Unlocked,
            window_high: 0,
        }
    }
}

impl ResolverState {
    /// Advance the version counter. Saturating: the counter never regresses.
    pub fn bump_version(&mut self) {
        self.version = self.version.saturating_add(1);
    }

    /// Encode as the state record: `(version, lock, window_high)`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        pack(&[
            Element::U64(u64::from(self.version)),
            Element::U64(self.lock.wire()),
            Element::U64(self.window_high),
        ])
    }

    /// Decode a state record.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let elements = unpack(buf)?;
        match elements.as_slice() {
            [Element::U64(version), Element::U64(lock), Element::U64(window_high)] => {
                let version = u32::try_from(*version).map_err(|_| DecodeError {
                    offset: 0,
                    detail: "state version exceeds u32",
                })?;
                let lock = LockState::from_wire(*lock).ok_or(DecodeError {
                    offset: 0,
                    detail: "unknown lock state",
                })?;
                Ok(Self {
                    version,
                    lock,
                    window_high: *window_high,
                })
            }
            _ => Err(DecodeError {
                offset: 0,
                detail: "state record is not (integer, integer, integer)",
            }),
        }
    }

    /// Decode a possibly-absent state record; absence is the default state.
    pub fn decode_or_default(buf: Option<&[u8]>) -> Result<Self, DecodeError> {
        match buf {
            Some(bytes) => Self::decode(bytes),
            None => Ok(Self::default()),
        }
    }
}
