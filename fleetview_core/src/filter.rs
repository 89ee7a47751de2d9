//! Filter pipeline: derives the visible subset of a snapshot.
//!
//! A [`FilterState`] expands into a list of independent [`Criterion`]s that
//! are AND-ed together, so the order they are applied in never matters.

use crate::model::{AggregateStats, Category, OperationalStatus, Snapshot, TrackedEntity};
use fleetview_env::EntityId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Either a wildcard or one concrete value to match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Match<T> {
    Any,
    Only(T),
}

impl<T> Default for Match<T> {
    fn default() -> Self {
        Match::Any
    }
}

impl<T: PartialEq> Match<T> {
    pub fn accepts(&self, value: &T) -> bool {
        match self {
            Match::Any => true,
            Match::Only(expected) => expected == value,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Match::Any)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Motion {
    Moving,
    Stopped,
}

/// One active filter condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    /// Lowercased needle matched against label and operator name
    Search(String),
    Status(OperationalStatus),
    Category(Category),
    /// Only fed entities can match a concrete connectivity
    Connectivity(Connectivity),
    /// Only online entities can match a concrete motion state
    Motion(Motion),
}

impl Criterion {
    pub fn matches(&self, entity: &TrackedEntity) -> bool {
        match self {
            Criterion::Search(needle) => {
                entity.display_label.to_lowercase().contains(needle.as_str())
                    || entity
                        .operator_name()
                        .is_some_and(|name| name.to_lowercase().contains(needle.as_str()))
            }
            Criterion::Status(status) => entity.status == *status,
            Criterion::Category(category) => entity.category == *category,
            Criterion::Connectivity(connectivity) => {
                if !entity.has_position_feed {
                    return false;
                }
                match connectivity {
                    Connectivity::Online => entity.is_online(),
                    Connectivity::Offline => !entity.is_online(),
                }
            }
            Criterion::Motion(motion) => {
                if !entity.is_online() {
                    return false;
                }
                match motion {
                    Motion::Moving => entity.is_moving(),
                    Motion::Stopped => !entity.is_moving(),
                }
            }
        }
    }
}

/// What the operator has asked to see.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    #[serde(default)]
    pub search_text: String,
    #[serde(default)]
    pub status: Match<OperationalStatus>,
    #[serde(default)]
    pub category: Match<Category>,
    #[serde(default)]
    pub connectivity: Match<Connectivity>,
    #[serde(default)]
    pub motion: Match<Motion>,
}

impl FilterState {
    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search_text = text.into();
        self
    }

    pub fn with_status(mut self, status: OperationalStatus) -> Self {
        self.status = Match::Only(status);
        self
    }

    pub fn with_category(mut self, category: impl Into<Category>) -> Self {
        self.category = Match::Only(category.into());
        self
    }

    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = Match::Only(connectivity);
        self
    }

    pub fn with_motion(mut self, motion: Motion) -> Self {
        self.motion = Match::Only(motion);
        self
    }

    /// True if any field is not a wildcard.
    pub fn is_active(&self) -> bool {
        !self.criteria().is_empty()
    }

    /// The active conditions, in no significant order.
    pub fn criteria(&self) -> Vec<Criterion> {
        let mut criteria = Vec::new();
        let needle = self.search_text.to_lowercase();
        if !needle.is_empty() {
            criteria.push(Criterion::Search(needle));
        }
        if let Match::Only(status) = &self.status {
            criteria.push(Criterion::Status(*status));
        }
        if let Match::Only(category) = &self.category {
            criteria.push(Criterion::Category(category.clone()));
        }
        if let Match::Only(connectivity) = &self.connectivity {
            criteria.push(Criterion::Connectivity(*connectivity));
        }
        if let Match::Only(motion) = &self.motion {
            criteria.push(Criterion::Motion(*motion));
        }
        criteria
    }

    pub fn matches(&self, entity: &TrackedEntity) -> bool {
        self.criteria().iter().all(|c| c.matches(entity))
    }

    /// Derives the visible subset of `snapshot`.
    pub fn apply(&self, snapshot: &Arc<Snapshot>) -> FilteredView {
        FilteredView::from_criteria(snapshot, &self.criteria())
    }
}

/// The filtered view of one snapshot, keeping snapshot order.
///
/// Holds indices into the shared snapshot rather than copies.
#[derive(Debug, Clone)]
pub struct FilteredView {
    snapshot: Arc<Snapshot>,
    indices: Vec<usize>,
}

impl FilteredView {
    /// Applies `criteria` one after another, narrowing the index list.
    pub fn from_criteria(snapshot: &Arc<Snapshot>, criteria: &[Criterion]) -> Self {
        let mut indices: Vec<usize> = (0..snapshot.len()).collect();
        for criterion in criteria {
            indices.retain(|&i| criterion.matches(&snapshot.entities()[i]));
        }
        Self {
            snapshot: Arc::clone(snapshot),
            indices,
        }
    }

    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    pub fn entities(&self) -> impl Iterator<Item = &TrackedEntity> + '_ {
        self.indices.iter().map(|&i| &self.snapshot.entities()[i])
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntityId> + '_ {
        self.entities().map(|e| &e.id)
    }

    pub fn get(&self, id: &EntityId) -> Option<&TrackedEntity> {
        self.entities().find(|e| &e.id == id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Entity count of the unfiltered snapshot ("N of M shown").
    pub fn total(&self) -> usize {
        self.snapshot.len()
    }

    /// Counters over the visible entities only.
    pub fn stats(&self) -> AggregateStats {
        AggregateStats::from_entities(self.entities())
    }
}
