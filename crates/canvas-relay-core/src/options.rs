//! Enumerated drawing options.
//!
//! On the wire these travel as plain strings (`"Round"`, `"Center"`, ...).
//! They are matched case-insensitively against a fixed set of accepted values;
//! anything outside the set is rejected with [`CommandError::InvalidEnumValue`]
//! rather than clamped to a default.

use std::fmt;
use std::str::FromStr;

use crate::error::CommandError;

macro_rules! canvas_option {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal {
            $($variant:ident => $wire:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Human-readable option name used in error messages.
            pub const OPTION: &'static str = $label;

            pub fn parse(value: &str) -> Result<Self, CommandError> {
                $(
                    if value.eq_ignore_ascii_case($wire) $(|| value.eq_ignore_ascii_case($alias))* {
                        return Ok(Self::$variant);
                    }
                )+
                Err(CommandError::InvalidEnumValue {
                    option: $label,
                    value: value.to_string(),
                })
            }

            /// Canonical wire spelling.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }

            pub fn all() -> &'static [Self] {
                &[$(Self::$variant),+]
            }
        }

        impl FromStr for $name {
            type Err = CommandError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

canvas_option! {
    /// Shape used at the ends of open subpaths.
    LineCap, "line cap" {
        Butt => "Butt",
        Round => "Round",
        Square => "Square",
    }
}

canvas_option! {
    /// Shape used where two segments meet.
    LineJoin, "line join" {
        Round => "Round",
        Bevel => "Bevel",
        Miter => "Miter",
    }
}

canvas_option! {
    TextAlign, "text align" {
        Start => "Start",
        End => "End",
        Left => "Left",
        Right => "Right",
        Center => "Center",
    }
}

canvas_option! {
    TextBaseline, "text baseline" {
        Top => "Top",
        Hanging => "Hanging",
        Middle => "Middle",
        Alphabetic => "Alphabetic",
        Ideographic => "Ideographic",
        Bottom => "Bottom",
    }
}

canvas_option! {
    TextDirection, "text direction" {
        Ltr => "Ltr",
        Rtl => "Rtl",
        Inherit => "Inherit",
    }
}

canvas_option! {
    ImageSmoothingQuality, "image smoothing quality" {
        Low => "Low",
        Medium => "Medium",
        High => "High",
    }
}

canvas_option! {
    /// Tiling mode for image patterns.
    PatternRepetition, "pattern repetition" {
        Repeat => "Repeat",
        RepeatX => "RepeatX" | "repeat-x",
        RepeatY => "RepeatY" | "repeat-y",
        NoRepeat => "NoRepeat" | "no-repeat",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(LineCap::parse("Round").unwrap(), LineCap::Round);
        assert_eq!(LineCap::parse("round").unwrap(), LineCap::Round);
        assert_eq!(LineCap::parse("ROUND").unwrap(), LineCap::Round);
        assert_eq!(TextBaseline::parse("alphabetic").unwrap(), TextBaseline::Alphabetic);
    }

    #[test]
    fn test_every_canonical_value_parses() {
        for cap in LineCap::all() {
            assert_eq!(LineCap::parse(cap.as_str()).unwrap(), *cap);
        }
        for align in TextAlign::all() {
            assert_eq!(align.as_str().parse::<TextAlign>().unwrap(), *align);
        }
        for quality in ImageSmoothingQuality::all() {
            assert_eq!(ImageSmoothingQuality::parse(quality.as_str()).unwrap(), *quality);
        }
    }

    #[test]
    fn test_unknown_value_is_rejected() {
        let err = LineJoin::parse("Bogus").unwrap_err();
        match err {
            CommandError::InvalidEnumValue { option, value } => {
                assert_eq!(option, "line join");
                assert_eq!(value, "Bogus");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(TextDirection::parse("").is_err());
    }

    #[test]
    fn test_pattern_repetition_accepts_hyphenated_keywords() {
        assert_eq!(PatternRepetition::parse("repeat-x").unwrap(), PatternRepetition::RepeatX);
        assert_eq!(PatternRepetition::parse("NoRepeat").unwrap(), PatternRepetition::NoRepeat);
        assert!(PatternRepetition::parse("repeat-z").is_err());
    }
}
