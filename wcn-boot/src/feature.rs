//! Logical features and per-subsystem feature masks.

use core::fmt;

use crate::subsys::Role;

/// Independently start/stoppable function of a subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Feature {
    Bluetooth = 0,
    Fm = 1,
    Wifi = 2,
    /// Debug/log channel to the BTWF firmware.
    Debug = 3,
    Gps = 4,
    /// GPS plus BeiDou; selects the BD firmware image.
    GpsBd = 5,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::Bluetooth,
        Feature::Fm,
        Feature::Wifi,
        Feature::Debug,
        Feature::Gps,
        Feature::GpsBd,
    ];

    /// Subsystem that hosts this feature.
    pub const fn role(self) -> Role {
        match self {
            Feature::Bluetooth | Feature::Fm | Feature::Wifi | Feature::Debug => Role::Btwf,
            Feature::Gps | Feature::GpsBd => Role::Gnss,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Feature::Bluetooth => "bluetooth",
            Feature::Fm => "fm",
            Feature::Wifi => "wifi",
            Feature::Debug => "debug",
            Feature::Gps => "gps",
            Feature::GpsBd => "gps-bd",
        }
    }

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Set of open features of one subsystem.
///
/// The subsystem is physically powered iff its mask is non-empty.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FeatureMask(u8);

impl FeatureMask {
    pub const EMPTY: FeatureMask = FeatureMask(0);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, feature: Feature) -> bool {
        self.0 & feature.bit() != 0
    }

    #[must_use]
    pub const fn with(self, feature: Feature) -> Self {
        Self(self.0 | feature.bit())
    }

    #[must_use]
    pub const fn without(self, feature: Feature) -> Self {
        Self(self.0 & !feature.bit())
    }

    pub fn iter(self) -> impl Iterator<Item = Feature> {
        Feature::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl fmt::Debug for FeatureMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(Feature::name)).finish()
    }
}

impl FromIterator<Feature> for FeatureMask {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        iter.into_iter().fold(FeatureMask::EMPTY, FeatureMask::with)
    }
}
