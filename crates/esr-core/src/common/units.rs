//! Unit conversions into the canonical SI units carried by [`crate::domain::Spectrum`].

use serde::{Deserialize, Serialize};

pub fn mt_to_t(value_mt: f64) -> f64 {
    value_mt * 1.0e-3
}

pub fn t_to_mt(value_t: f64) -> f64 {
    value_t * 1.0e3
}

pub fn gauss_to_t(value_gauss: f64) -> f64 {
    value_gauss * 1.0e-4
}

pub fn t_to_gauss(value_t: f64) -> f64 {
    value_t * 1.0e4
}

pub fn ghz_to_hz(value_ghz: f64) -> f64 {
    value_ghz * 1.0e9
}

pub fn hz_to_ghz(value_hz: f64) -> f64 {
    value_hz * 1.0e-9
}

pub fn mw_to_w(value_mw: f64) -> f64 {
    value_mw * 1.0e-3
}

pub fn w_to_mw(value_w: f64) -> f64 {
    value_w * 1.0e3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldUnit {
    Tesla,
    Millitesla,
    Gauss,
}

impl FieldUnit {
    /// Detect the unit from a column header such as `Field [mT]` or
    /// `B (G)`. Headers without a recognizable token are taken as tesla.
    pub fn from_header(header: &str) -> Self {
        header
            .split(|character: char| !character.is_ascii_alphanumeric())
            .filter(|token| !token.is_empty())
            .find_map(|token| match token.to_ascii_lowercase().as_str() {
                "mt" | "millitesla" => Some(Self::Millitesla),
                "g" | "gauss" => Some(Self::Gauss),
                "t" | "tesla" => Some(Self::Tesla),
                _ => None,
            })
            .unwrap_or(Self::Tesla)
    }

    pub fn to_tesla(self, value: f64) -> f64 {
        match self {
            Self::Tesla => value,
            Self::Millitesla => mt_to_t(value),
            Self::Gauss => gauss_to_t(value),
        }
    }

    pub fn convert_to_tesla(self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|value| self.to_tesla(*value)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        FieldUnit, gauss_to_t, ghz_to_hz, hz_to_ghz, mt_to_t, mw_to_w, t_to_gauss, t_to_mt,
        w_to_mw,
    };

    fn assert_close(expected: f64, actual: f64) {
        assert!(
            (expected - actual).abs() <= 1.0e-12 * expected.abs().max(1.0),
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn conversions_round_trip() {
        assert_close(1234.5, t_to_gauss(gauss_to_t(1234.5)));
        assert_close(123.45, t_to_mt(gauss_to_t(1234.5)) * 10.0);
        assert_close(12.3, t_to_mt(mt_to_t(12.3)));
        assert_close(9.5, hz_to_ghz(ghz_to_hz(9.5)));
        assert_close(15.0, w_to_mw(mw_to_w(15.0)));
    }

    #[test]
    fn header_detection_uses_unit_tokens() {
        assert_eq!(FieldUnit::from_header("Field [mT]"), FieldUnit::Millitesla);
        assert_eq!(FieldUnit::from_header("B (G)"), FieldUnit::Gauss);
        assert_eq!(FieldUnit::from_header("field_gauss"), FieldUnit::Gauss);
        assert_eq!(FieldUnit::from_header("magnetic"), FieldUnit::Tesla);
        assert_eq!(FieldUnit::from_header("Field/Gauss"), FieldUnit::Gauss);
        assert_eq!(FieldUnit::from_header("Signal"), FieldUnit::Tesla);
        assert_eq!(FieldUnit::from_header("B [T]"), FieldUnit::Tesla);
    }

    #[test]
    fn field_values_convert_to_tesla() {
        let converted = FieldUnit::Millitesla.convert_to_tesla(&[330.0, 340.0]);
        assert_close(0.33, converted[0]);
        assert_close(0.34, converted[1]);
        assert_close(0.35, FieldUnit::Gauss.to_tesla(3500.0));
    }
}
