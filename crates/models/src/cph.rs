use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// County codes CTS considers in scope. SAM carries the full 01..99 range.
pub const CTS_COUNTY_RANGE: RangeInclusive<u8> = 1..=51;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseCphError {
    #[error("'{0}' is not a CC/PPP/HHHH county-parish-holding identifier")]
    MalformedCph(String),
    #[error("'{0}' is not a XX-CC/PPP/HHHH LID full identifier")]
    MalformedLid(String),
}

/// A County-Parish-Holding identifier, canonically `CC/PPP/HHHH`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cph {
    pub county: u8,
    pub parish: u16,
    pub holding: u16,
}

impl Cph {
    pub fn parse(raw: &str) -> Result<Cph, ParseCphError> {
        let err = || ParseCphError::MalformedCph(raw.to_string());
        let mut parts = raw.trim().split('/');

        let county = parse_digits(parts.next(), 2).ok_or_else(err)?;
        let parish = parse_digits(parts.next(), 3).ok_or_else(err)?;
        let holding = parse_digits(parts.next(), 4).ok_or_else(err)?;
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(Cph {
            county: county as u8,
            parish: parish as u16,
            holding: holding as u16,
        })
    }
}

impl std::fmt::Display for Cph {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{:02}/{:03}/{:04}",
            self.county, self.parish, self.holding
        )
    }
}

/// A region-prefixed CPH, canonically `XX-CC/PPP/HHHH`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lid {
    pub region: String,
    pub cph: Cph,
}

impl Lid {
    pub fn parse(raw: &str) -> Result<Lid, ParseCphError> {
        let err = || ParseCphError::MalformedLid(raw.to_string());
        let (region, rest) = raw.trim().split_once('-').ok_or_else(err)?;

        if region.len() != 2 || !region.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(err());
        }
        let cph = Cph::parse(rest).map_err(|_| err())?;
        Ok(Lid {
            region: region.to_ascii_uppercase(),
            cph,
        })
    }

    /// Whether the county code falls inside the range CTS actually issues.
    pub fn in_cts_county_range(&self) -> bool {
        CTS_COUNTY_RANGE.contains(&self.cph.county)
    }
}

impl std::fmt::Display for Lid {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}-{}", self.region, self.cph)
    }
}

fn parse_digits(part: Option<&str>, width: usize) -> Option<u32> {
    let part = part?;
    if part.len() != width || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cph_round_trips_canonical_form() {
        let cph = Cph::parse("12/345/6001").unwrap();
        assert_eq!(
            cph,
            Cph {
                county: 12,
                parish: 345,
                holding: 6001
            }
        );
        assert_eq!(cph.to_string(), "12/345/6001");
        assert_eq!(Cph::parse("01/002/0003").unwrap().to_string(), "01/002/0003");
    }

    #[test]
    fn malformed_cphs_are_rejected() {
        for raw in ["", "12/345", "1/345/6001", "12/34/6001", "12/345/601", "12/345/6001/9", "ab/cde/fghi"] {
            assert!(Cph::parse(raw).is_err(), "{raw:?} should not parse");
        }
    }

    #[test]
    fn lid_parses_region_and_cph() {
        let lid = Lid::parse("UK-12/345/6001").unwrap();
        assert_eq!(lid.region, "UK");
        assert_eq!(lid.cph.to_string(), "12/345/6001");
        assert_eq!(lid.to_string(), "UK-12/345/6001");
        assert!(lid.in_cts_county_range());

        let out_of_range = Lid::parse("UK-52/345/6001").unwrap();
        assert!(!out_of_range.in_cts_county_range());
    }

    #[test]
    fn malformed_lids_are_rejected() {
        for raw in ["", "12/345/6001", "U-12/345/6001", "UKX-12/345/6001", "UK_12/345/6001"] {
            assert!(Lid::parse(raw).is_err(), "{raw:?} should not parse");
        }
    }
}
