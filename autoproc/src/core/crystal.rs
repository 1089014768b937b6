//! Crystal parameters supplied with a request: space group and unit cell.

use crate::errors::PreconditionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest International Tables space-group number.
const MAX_SPACE_GROUP: u16 = 230;

/// A space group given either by number or by Hermann-Mauguin symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpaceGroup {
    /// International Tables number (1-230).
    Number(u16),
    /// Hermann-Mauguin symbol, e.g. `P 21 21 21`.
    Symbol(String),
}

impl SpaceGroup {
    /// Validates a raw value, mapping `0` and empty symbols to "not supplied".
    pub fn normalize(self) -> Result<Option<Self>, PreconditionError> {
        match self {
            Self::Number(0) => Ok(None),
            Self::Number(n) if n <= MAX_SPACE_GROUP => Ok(Some(Self::Number(n))),
            Self::Number(n) => Err(PreconditionError::InvalidSpaceGroup(n.to_string())),
            Self::Symbol(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                trimmed.parse::<Self>().map(Some)
            }
        }
    }

    /// Returns the number if the space group was given numerically.
    #[must_use]
    pub fn number(&self) -> Option<u16> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Symbol(_) => None,
        }
    }
}

impl FromStr for SpaceGroup {
    type Err = PreconditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(n) = trimmed.parse::<u16>() {
            if (1..=MAX_SPACE_GROUP).contains(&n) {
                return Ok(Self::Number(n));
            }
            return Err(PreconditionError::InvalidSpaceGroup(s.to_string()));
        }
        let valid = !trimmed.is_empty()
            && trimmed.starts_with(|c: char| c.is_ascii_alphabetic())
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '/' | '_'));
        if valid {
            Ok(Self::Symbol(trimmed.to_string()))
        } else {
            Err(PreconditionError::InvalidSpaceGroup(s.to_string()))
        }
    }
}

impl fmt::Display for SpaceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Symbol(s) => f.write_str(s),
        }
    }
}

/// Unit cell parameters (lengths in Å, angles in degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    /// Cell edge a.
    pub a: f64,
    /// Cell edge b.
    pub b: f64,
    /// Cell edge c.
    pub c: f64,
    /// Angle alpha.
    pub alpha: f64,
    /// Angle beta.
    pub beta: f64,
    /// Angle gamma.
    pub gamma: f64,
}

impl UnitCell {
    /// Returns the parameters in `a b c alpha beta gamma` order.
    #[must_use]
    pub fn to_array(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.alpha, self.beta, self.gamma]
    }
}

impl FromStr for UnitCell {
    type Err = PreconditionError;

    /// Parses six numbers separated by whitespace and/or commas.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PreconditionError::InvalidUnitCell(s.to_string());
        let values = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(|t| t.parse::<f64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        let [a, b, c, alpha, beta, gamma] = <[f64; 6]>::try_from(values).map_err(|_| invalid())?;
        let lengths_ok = [a, b, c].iter().all(|v| v.is_finite() && *v > 0.0);
        let angles_ok = [alpha, beta, gamma]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0 && *v < 180.0);
        if !lengths_ok || !angles_ok {
            return Err(invalid());
        }

        Ok(Self {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
        })
    }
}

impl fmt::Display for UnitCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.a, self.b, self.c, self.alpha, self.beta, self.gamma
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_unit_cell_whitespace_and_commas() {
        let cell: UnitCell = "78.1, 78.1 37.2 90 90 90".parse().unwrap();
        assert_eq!(cell.to_array(), [78.1, 78.1, 37.2, 90.0, 90.0, 90.0]);
    }

    #[test]
    fn test_parse_unit_cell_rejects_wrong_arity() {
        assert!("78 78 37 90 90".parse::<UnitCell>().is_err());
        assert!("78 78 37 90 90 90 90".parse::<UnitCell>().is_err());
    }

    #[test]
    fn test_parse_unit_cell_rejects_bad_angles() {
        assert!("78 78 37 90 180 90".parse::<UnitCell>().is_err());
        assert!("78 -1 37 90 90 90".parse::<UnitCell>().is_err());
    }

    #[test]
    fn test_space_group_number_zero_is_absent() {
        assert_eq!(SpaceGroup::Number(0).normalize().unwrap(), None);
        assert_eq!(
            SpaceGroup::Number(19).normalize().unwrap(),
            Some(SpaceGroup::Number(19))
        );
        assert!(SpaceGroup::Number(231).normalize().is_err());
    }

    #[test]
    fn test_space_group_symbol() {
        let sg: SpaceGroup = "P 21 21 21".parse().unwrap();
        assert_eq!(sg, SpaceGroup::Symbol("P 21 21 21".to_string()));
        assert_eq!("96".parse::<SpaceGroup>().unwrap().number(), Some(96));
        assert!("?!".parse::<SpaceGroup>().is_err());
    }

    #[test]
    fn test_space_group_deserializes_untagged() {
        let n: SpaceGroup = serde_json::from_str("4").unwrap();
        let s: SpaceGroup = serde_json::from_str(r#""C 2 2 21""#).unwrap();
        assert_eq!(n, SpaceGroup::Number(4));
        assert_eq!(s, SpaceGroup::Symbol("C 2 2 21".to_string()));
    }
}
