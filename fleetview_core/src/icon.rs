//! Marker icon derivation.

use crate::model::{Category, TrackedEntity};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerColor {
    Gray,
    Green,
    Blue,
}

impl MarkerColor {
    pub fn hex(&self) -> &'static str {
        match self {
            MarkerColor::Gray => "#9ca3af",
            MarkerColor::Green => "#22c55e",
            MarkerColor::Blue => "#3b82f6",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Glyph {
    Truck,
    Car,
}

/// The inputs an icon is derived from. A marker's icon is only re-rendered
/// when these change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconParams {
    pub category: Category,
    pub is_online: bool,
    pub is_moving: bool,
}

impl IconParams {
    pub fn of(entity: &TrackedEntity) -> Self {
        Self {
            category: entity.category.clone(),
            is_online: entity.is_online(),
            is_moving: entity.is_moving(),
        }
    }
}

/// What the rendering substrate draws for one marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkerIcon {
    pub color: MarkerColor,
    pub glyph: Glyph,
    /// Animated badge shown while the vehicle is under way
    pub pulsing: bool,
}

impl MarkerIcon {
    /// Gray when offline, green when online and moving, blue when online
    /// and stationary. Bulk categories draw as trucks.
    pub fn derive(params: &IconParams) -> Self {
        let color = match (params.is_online, params.is_moving) {
            (false, _) => MarkerColor::Gray,
            (true, true) => MarkerColor::Green,
            (true, false) => MarkerColor::Blue,
        };
        let glyph = if params.category.is_bulk() {
            Glyph::Truck
        } else {
            Glyph::Car
        };
        Self {
            color,
            glyph,
            pulsing: params.is_online && params.is_moving,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(category: &str, is_online: bool, is_moving: bool) -> IconParams {
        IconParams {
            category: Category::from(category),
            is_online,
            is_moving,
        }
    }

    #[test]
    fn test_color_rules() {
        assert_eq!(MarkerIcon::derive(&params("car", false, true)).color, MarkerColor::Gray);
        assert_eq!(MarkerIcon::derive(&params("car", true, true)).color, MarkerColor::Green);
        assert_eq!(MarkerIcon::derive(&params("car", true, false)).color, MarkerColor::Blue);
    }

    #[test]
    fn test_glyph_rules() {
        assert_eq!(MarkerIcon::derive(&params("van", true, false)).glyph, Glyph::Truck);
        assert_eq!(MarkerIcon::derive(&params("crew-cab", true, false)).glyph, Glyph::Truck);
        assert_eq!(MarkerIcon::derive(&params("Crew_Cab", true, false)).glyph, Glyph::Truck);
        assert_eq!(MarkerIcon::derive(&params("sedan", true, false)).glyph, Glyph::Car);
    }

    #[test]
    fn test_pulse_only_when_online_and_moving() {
        assert!(MarkerIcon::derive(&params("car", true, true)).pulsing);
        assert!(!MarkerIcon::derive(&params("car", false, true)).pulsing);
        assert!(!MarkerIcon::derive(&params("car", true, false)).pulsing);
    }
}
