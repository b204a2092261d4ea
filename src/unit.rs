//! Units of measurement for the `RANGE`/`UNIT` node extension attributes.
//!
//! Adapted from the teacher's `oscunit.rs`. The category/value split and
//! wire encoding (`"distance.cm"`, `"speed.km/h"`, …) are unchanged, but
//! the category enums are renamed to drop the redundant `OSC` prefix now
//! that they live in [`crate::unit`], the round-trip bug where `Knots`
//! serialized as `"knots"` but only deserialized `"kn"` is fixed, and
//! (de)serialization is centralized instead of duplicated per category.
//!
//! See the [OSCQuery proposal](https://github.com/Vidvox/OSCQueryProposal).

use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! unit_enum {
    ($name:ident { $($variant:ident => $tag:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            fn tag(self) -> &'static str {
                match self {
                    $(Self::$variant => $tag),+
                }
            }

            fn from_tag(tag: &str) -> Option<Self> {
                match tag {
                    $($tag => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

unit_enum!(Distance {
    Meter => "m",
    Kilometer => "km",
    Decimeter => "dm",
    Centimeter => "cm",
    Millimeter => "mm",
    Micrometer => "um",
    Nanometer => "nm",
    Picometer => "pm",
    Inches => "inches",
    Feet => "feet",
    Miles => "miles",
    Pixels => "pixels",
});

unit_enum!(Angle {
    Degree => "degree",
    Radian => "radian",
});

unit_enum!(Gain {
    Linear => "linear",
    Midigain => "midigain",
    Db => "db",
    DbRaw => "db-raw",
});

unit_enum!(TimeUnit {
    Second => "second",
    Bark => "bark",
    Bpm => "bpm",
    Cents => "cents",
    Hz => "hz",
    Mel => "mel",
    Midinote => "midinote",
    Millisecond => "ms",
    Speed => "speed",
    Samples => "samples",
});

unit_enum!(Speed {
    MetersPerSecond => "m/s",
    MilesPerHour => "mph",
    KilometersPerHour => "km/h",
    Knots => "kn",
    FeetPerSecond => "ft/s",
    FeetPerHour => "ft/h",
    PixelsPerSecond => "pix/s",
});

/// A composite unit: category plus the value within that category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscUnit {
    Distance(Distance),
    Angle(Angle),
    Gain(Gain),
    Time(TimeUnit),
    Speed(Speed),
}

impl OscUnit {
    fn category(&self) -> &'static str {
        match self {
            OscUnit::Distance(_) => "distance",
            OscUnit::Angle(_) => "angle",
            OscUnit::Gain(_) => "gain",
            OscUnit::Time(_) => "time",
            OscUnit::Speed(_) => "speed",
        }
    }

    fn value_tag(&self) -> &'static str {
        match self {
            OscUnit::Distance(d) => d.tag(),
            OscUnit::Angle(a) => a.tag(),
            OscUnit::Gain(g) => g.tag(),
            OscUnit::Time(t) => t.tag(),
            OscUnit::Speed(s) => s.tag(),
        }
    }
}

impl std::fmt::Display for OscUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.category(), self.value_tag())
    }
}

impl std::str::FromStr for OscUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, tag) = s
            .split_once('.')
            .ok_or_else(|| format!("malformed unit string: {s:?}"))?;
        match category {
            "distance" => Distance::from_tag(tag).map(OscUnit::Distance),
            "angle" => Angle::from_tag(tag).map(OscUnit::Angle),
            "gain" => Gain::from_tag(tag).map(OscUnit::Gain),
            "time" => TimeUnit::from_tag(tag).map(OscUnit::Time),
            "speed" => Speed::from_tag(tag).map(OscUnit::Speed),
            _ => None,
        }
        .ok_or_else(|| format!("unknown unit: {s:?}"))
    }
}

impl Serialize for OscUnit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for OscUnit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        for unit in [
            OscUnit::Distance(Distance::Kilometer),
            OscUnit::Angle(Angle::Degree),
            OscUnit::Gain(Gain::DbRaw),
            OscUnit::Time(TimeUnit::Samples),
            OscUnit::Speed(Speed::Knots),
        ] {
            let json = serde_json::to_string(&unit).unwrap();
            let parsed: OscUnit = serde_json::from_str(&json).unwrap();
            assert_eq!(unit, parsed);
        }
    }

    #[test]
    fn matches_proposal_wire_strings() {
        assert_eq!(
            OscUnit::Distance(Distance::Centimeter).to_string(),
            "distance.cm"
        );
        assert_eq!(
            OscUnit::Speed(Speed::KilometersPerHour).to_string(),
            "speed.km/h"
        );
    }

    #[test]
    fn unknown_unit_string_is_rejected() {
        assert!("bogus.thing".parse::<OscUnit>().is_err());
    }
}
