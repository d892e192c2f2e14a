//! VLAN trunk range parsing.
//!
//! Trunk ranges are comma-separated lists of VLAN ids and inclusive
//! `min-max` spans, e.g. `"50,51,700-710"`. The single element `"0"`
//! denotes the untagged VLAN.

use thiserror::Error;

/// Rejection of a malformed trunk range.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("trunk format is invalid, it should follow this pattern 50,51,700-710")]
pub struct InvalidVlanRange;

/// Expands a trunk range string into the list of VLAN ids it covers.
///
/// Fails if the string contains anything but digits, commas and dashes,
/// if a span has more than two components, or if a span starts at 0 or
/// runs backwards.
pub fn parse_vlan_range(trunk: &str) -> Result<Vec<u16>, InvalidVlanRange> {
    if !trunk
        .chars()
        .all(|c| c.is_ascii_digit() || c == ',' || c == '-')
    {
        return Err(InvalidVlanRange);
    }
    let mut result = Vec::new();
    for element in trunk.split(',') {
        if element.contains('-') {
            let mut bounds = element.split('-');
            let (min, max) = (bounds.next(), bounds.next());
            if bounds.next().is_some() {
                return Err(InvalidVlanRange);
            }
            let min: u16 = min
                .unwrap_or_default()
                .parse()
                .map_err(|_| InvalidVlanRange)?;
            let max: u16 = max
                .unwrap_or_default()
                .parse()
                .map_err(|_| InvalidVlanRange)?;
            if min == 0 || min > max {
                return Err(InvalidVlanRange);
            }
            result.extend(min..=max);
        } else {
            result.push(element.parse().map_err(|_| InvalidVlanRange)?);
        }
    }
    Ok(result)
}
