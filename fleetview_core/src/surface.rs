//! The rendering substrate seen from the tracking core.
//!
//! A [`MapSurface`] is whatever actually draws the map: a browser map
//! library behind a bridge, a native widget, or the in-memory recorder used
//! by the simulator. The core only ever talks to it through this trait.

use crate::icon::MarkerIcon;
use crate::model::LatLng;
use fleetview_env::EntityId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Substrate-assigned handle of one live marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarkerId(pub u64);

impl std::fmt::Display for MarkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Channel on which marker clicks are reported as entity ids.
pub type ClickSink = UnboundedSender<EntityId>;

/// Axis-aligned region to frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl Bounds {
    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.south_west.lat + self.north_east.lat) / 2.0,
            (self.south_west.lng + self.north_east.lng) / 2.0,
        )
    }
}

/// A marker operation the substrate refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("Invalid coordinates ({lat}, {lng})")]
    InvalidCoordinates { lat: f64, lng: f64 },

    #[error("Unknown marker {0}")]
    UnknownMarker(MarkerId),

    #[error("Rendering substrate error: {0}")]
    Substrate(String),
}

/// Capability surface of the map library.
pub trait MapSurface {
    /// Registers engine-lifetime resources (icon CSS, pulse animation).
    fn install_styles(&mut self) -> Result<(), RenderError>;

    fn create_marker(&mut self, at: LatLng, icon: &MarkerIcon) -> Result<MarkerId, RenderError>;

    /// Moves and/or restyles a marker; `None` leaves that aspect unchanged.
    fn update_marker(
        &mut self,
        marker: MarkerId,
        at: Option<LatLng>,
        icon: Option<&MarkerIcon>,
    ) -> Result<(), RenderError>;

    fn remove_marker(&mut self, marker: MarkerId) -> Result<(), RenderError>;

    /// Arranges for a click on `marker` to send `entity` down `sink`.
    fn on_marker_click(
        &mut self,
        marker: MarkerId,
        entity: EntityId,
        sink: ClickSink,
    ) -> Result<(), RenderError>;

    fn fit_bounds(&mut self, bounds: Bounds, padding_px: u32);

    fn set_view(&mut self, at: LatLng, zoom: u8);

    fn open_popup(&mut self, marker: MarkerId) -> Result<(), RenderError>;

    /// Counterpart of [`MapSurface::install_styles`].
    fn release_styles(&mut self);

    /// Destroys the map instance itself.
    fn release(&mut self);
}
