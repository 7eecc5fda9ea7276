//! Document identities
//!
//! The collaborative session hands out at most eight panes, identified by the
//! strings `"1"` through `"8"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DocumentIdError;

/// Number of pane slots a session can hold.
pub const MAX_DOCUMENTS: u8 = 8;

/// Context key under which a document's id is recorded on its haps.
pub const DOC_ID_CONTEXT_KEY: &str = "doc_id";

/// Stable identifier of one code pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DocumentId(u8);

impl DocumentId {
    pub fn new(slot: u8) -> Result<Self, DocumentIdError> {
        if (1..=MAX_DOCUMENTS).contains(&slot) {
            Ok(Self(slot))
        } else {
            Err(DocumentIdError::OutOfRange(slot))
        }
    }

    pub fn slot(&self) -> u8 {
        self.0
    }

    /// All slots in ascending order.
    pub fn all() -> impl Iterator<Item = DocumentId> {
        (1..=MAX_DOCUMENTS).map(DocumentId)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = DocumentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let slot = s
            .trim()
            .parse::<u8>()
            .map_err(|_| DocumentIdError::Invalid(s.to_string()))?;
        Self::new(slot)
    }
}

impl TryFrom<u8> for DocumentId {
    type Error = DocumentIdError;

    fn try_from(slot: u8) -> Result<Self, Self::Error> {
        Self::new(slot)
    }
}

impl From<DocumentId> for u8 {
    fn from(id: DocumentId) -> u8 {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_pane_ids() {
        assert_eq!("3".parse::<DocumentId>().unwrap().slot(), 3);
        assert_eq!(DocumentId::new(8).unwrap().to_string(), "8");
    }

    #[test]
    fn test_rejects_out_of_range_and_garbage() {
        assert_eq!(DocumentId::new(0), Err(DocumentIdError::OutOfRange(0)));
        assert_eq!(DocumentId::new(9), Err(DocumentIdError::OutOfRange(9)));
        assert!(matches!(
            "editor".parse::<DocumentId>(),
            Err(DocumentIdError::Invalid(_))
        ));
    }

    #[test]
    fn test_all_slots() {
        let ids: Vec<u8> = DocumentId::all().map(|id| id.slot()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_serde_uses_slot_number() {
        let id = DocumentId::new(2).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "2");
        assert!(serde_json::from_str::<DocumentId>("12").is_err());
    }
}
