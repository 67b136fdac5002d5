//! Collapses one history page into a single change per message.

use std::collections::HashMap;

use crate::domain::MessageId;
use crate::domain::ports::{HistoryChange, HistoryRecord};

/// Net change for one message within a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PageChange {
    Added,
    Modified,
    Deleted,
}

impl PageChange {
    fn merge(self, next: Self) -> Self {
        match (self, next) {
            (Self::Deleted, _) | (_, Self::Deleted) => Self::Deleted,
            (Self::Added, _) | (_, Self::Added) => Self::Added,
            (Self::Modified, Self::Modified) => Self::Modified,
        }
    }
}

/// Classify a page's records, preserving first-appearance order.
///
/// Deletion dominates any other change to the same id; an addition dominates
/// a label change.
pub(super) fn classify_page(records: &[HistoryRecord]) -> Vec<(MessageId, PageChange)> {
    let mut ordered: Vec<(MessageId, PageChange)> = Vec::new();
    let mut positions: HashMap<MessageId, usize> = HashMap::new();

    for change in records.iter().flat_map(|record| record.changes.iter()) {
        let (id, class) = match change {
            HistoryChange::MessageAdded(id) => (id, PageChange::Added),
            HistoryChange::MessageDeleted(id) => (id, PageChange::Deleted),
            HistoryChange::LabelsAdded(id) | HistoryChange::LabelsRemoved(id) => {
                (id, PageChange::Modified)
            }
        };
        match positions.get(id) {
            Some(&index) => {
                let slot = &mut ordered[index].1;
                *slot = slot.merge(class);
            }
            None => {
                positions.insert(id.clone(), ordered.len());
                ordered.push((id.clone(), class));
            }
        }
    }

    ordered
}
