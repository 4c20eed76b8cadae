//! Filter wheel position descriptors (specification §4.5 "Accessory
//! Coordinator").

use serde::{Deserialize, Serialize};

/// The physical/spectral type of a filter, used by orchestrators to decide
/// default exposure scaling and calibration grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterType {
    Luminance,
    Red,
    Green,
    Blue,
    Halpha,
    Oiii,
    Sii,
    Clear,
    Dark,
    Custom,
}

/// Static description of a single filter wheel slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterDescriptor {
    pub name: String,
    pub filter_type: FilterType,
    pub position: u8,
    pub recommended_exposure_s: Option<f64>,
    pub description: String,
}

impl FilterDescriptor {
    pub fn new(name: impl Into<String>, filter_type: FilterType, position: u8) -> Self {
        Self {
            name: name.into(),
            filter_type,
            position,
            recommended_exposure_s: None,
            description: String::new(),
        }
    }

    pub fn with_recommended_exposure(mut self, seconds: f64) -> Self {
        self.recommended_exposure_s = Some(seconds);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_optional_fields() {
        let filter = FilterDescriptor::new("Ha", FilterType::Halpha, 3)
            .with_recommended_exposure(300.0)
            .with_description("7nm narrowband");
        assert_eq!(filter.position, 3);
        assert_eq!(filter.recommended_exposure_s, Some(300.0));
        assert_eq!(filter.description, "7nm narrowband");
    }

    #[test]
    fn defaults_have_no_recommendation() {
        let filter = FilterDescriptor::new("L", FilterType::Luminance, 0);
        assert!(filter.recommended_exposure_s.is_none());
    }
}
