//! Operator selection: at most one entity, validated against each view.

use crate::filter::FilteredView;
use crate::model::TrackedEntity;
use fleetview_env::EntityId;

/// What a selection operation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionChange {
    /// A different entity is now selected
    Selected(EntityId),
    /// The operator cleared the selection
    Cleared,
    /// The selected entity dropped out of the filtered view and was deselected
    Invalidated(EntityId),
    Unchanged,
}

impl SelectionChange {
    pub fn is_change(&self) -> bool {
        !matches!(self, SelectionChange::Unchanged)
    }
}

/// The currently selected entity, if any.
///
/// A selection never outlives the entity's presence in the filtered view:
/// [`Selection::revalidate`] clears it as soon as the id is filtered out or
/// disappears from the feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    current: Option<EntityId>,
}

impl Selection {
    pub fn current(&self) -> Option<&EntityId> {
        self.current.as_ref()
    }

    pub fn is_selected(&self, id: &EntityId) -> bool {
        self.current.as_ref() == Some(id)
    }

    pub fn select(&mut self, id: EntityId) -> SelectionChange {
        if self.is_selected(&id) {
            return SelectionChange::Unchanged;
        }
        self.current = Some(id.clone());
        SelectionChange::Selected(id)
    }

    pub fn clear(&mut self) -> SelectionChange {
        match self.current.take() {
            Some(_) => SelectionChange::Cleared,
            None => SelectionChange::Unchanged,
        }
    }

    /// Drops the selection if `view` no longer contains it.
    pub fn revalidate(&mut self, view: &FilteredView) -> SelectionChange {
        match &self.current {
            Some(id) if !view.contains(id) => {
                let id = id.clone();
                self.current = None;
                SelectionChange::Invalidated(id)
            }
            _ => SelectionChange::Unchanged,
        }
    }

    /// The selected entity as it appears in `view`.
    pub fn resolve<'v>(&self, view: &'v FilteredView) -> Option<&'v TrackedEntity> {
        self.current.as_ref().and_then(|id| view.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterState;
    use crate::model::{AggregateStats, Category, EntityKind, OperationalStatus, Snapshot};
    use std::sync::Arc;

    fn snapshot(ids: &[(&str, OperationalStatus)]) -> Arc<Snapshot> {
        let entities = ids
            .iter()
            .map(|(id, status)| TrackedEntity {
                id: EntityId::from(*id),
                display_label: id.to_string(),
                category: Category::from("car"),
                status: *status,
                has_position_feed: false,
                position: None,
                assigned_operator: None,
                associated_task: None,
            })
            .collect();
        Arc::new(Snapshot::new(EntityKind::Vehicles, 1, 0, entities, AggregateStats::default()))
    }

    #[test]
    fn test_select_and_clear() {
        let mut selection = Selection::default();
        assert_eq!(selection.clear(), SelectionChange::Unchanged);

        assert_eq!(
            selection.select(EntityId::from("V1")),
            SelectionChange::Selected(EntityId::from("V1"))
        );
        assert_eq!(selection.select(EntityId::from("V1")), SelectionChange::Unchanged);
        assert!(selection.is_selected(&EntityId::from("V1")));

        assert_eq!(selection.clear(), SelectionChange::Cleared);
        assert_eq!(selection.current(), None);
    }

    #[test]
    fn test_filtered_out_selection_is_invalidated() {
        let snapshot = snapshot(&[
            ("V1", OperationalStatus::Available),
            ("V2", OperationalStatus::Maintenance),
        ]);
        let mut selection = Selection::default();
        selection.select(EntityId::from("V1"));

        let all = FilterState::default().apply(&snapshot);
        assert_eq!(selection.revalidate(&all), SelectionChange::Unchanged);
        assert_eq!(selection.resolve(&all).map(|e| e.display_label.as_str()), Some("V1"));

        let maintenance = FilterState::default()
            .with_status(OperationalStatus::Maintenance)
            .apply(&snapshot);
        assert_eq!(
            selection.revalidate(&maintenance),
            SelectionChange::Invalidated(EntityId::from("V1"))
        );
        assert_eq!(selection.current(), None);
        assert!(selection.resolve(&maintenance).is_none());
    }

    #[test]
    fn test_entity_vanishing_from_feed_invalidates() {
        let mut selection = Selection::default();
        selection.select(EntityId::from("V2"));

        let next = snapshot(&[("V1", OperationalStatus::Busy)]);
        let view = FilterState::default().apply(&next);
        assert!(selection.revalidate(&view).is_change());
        assert_eq!(selection.current(), None);
    }
}
