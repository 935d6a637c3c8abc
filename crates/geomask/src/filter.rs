//! Predicate filtering over polygon attributes.
//!
//! [`filter`] takes any closure. [`AttributeFilter`] is the serializable form
//! used by run configurations and the command line (`elongation<10`).

use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr, VariantNames};

use crate::{
    algorithms::attributes::GeometricAttributes,
    error::{MaskError, Result},
    types::AttributedPolygon,
};

/// Owned subsequence of `polygons` whose attributes satisfy `predicate`, in input order
pub fn filter<F>(polygons: &[AttributedPolygon], predicate: F) -> Vec<AttributedPolygon>
where
    F: Fn(&GeometricAttributes) -> bool,
{
    polygons
        .iter()
        .filter(|polygon| predicate(&polygon.attributes))
        .cloned()
        .collect()
}

/// Numeric attribute a bound can refer to
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
    EnumIter,
    VariantNames,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Attribute {
    AreaM2,
    PerimeterM,
    Elongation,
    MbrMajorM,
    MbrMinorM,
    OrientationDeg,
    Compactness,
    Convexity,
    HoleCount,
}

impl Attribute {
    pub fn value(self, attributes: &GeometricAttributes) -> f64 {
        match self {
            Attribute::AreaM2 => attributes.area_m2,
            Attribute::PerimeterM => attributes.perimeter_m,
            Attribute::Elongation => attributes.elongation,
            Attribute::MbrMajorM => attributes.mbr_major_m,
            Attribute::MbrMinorM => attributes.mbr_minor_m,
            Attribute::OrientationDeg => attributes.orientation_deg,
            Attribute::Compactness => attributes.compactness,
            Attribute::Convexity => attributes.convexity,
            Attribute::HoleCount => attributes.hole_count as f64,
        }
    }
}

/// Open interval on one attribute; both comparisons are strict
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AttributeBound {
    pub attribute: Attribute,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greater_than: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub less_than: Option<f64>,
}

impl AttributeBound {
    pub fn greater_than(attribute: Attribute, value: f64) -> Self {
        Self {
            attribute,
            greater_than: Some(value),
            less_than: None,
        }
    }

    pub fn less_than(attribute: Attribute, value: f64) -> Self {
        Self {
            attribute,
            greater_than: None,
            less_than: Some(value),
        }
    }

    /// NaN attribute values never match
    pub fn matches(&self, attributes: &GeometricAttributes) -> bool {
        let value = self.attribute.value(attributes);
        !value.is_nan()
            && self.greater_than.is_none_or(|bound| value > bound)
            && self.less_than.is_none_or(|bound| value < bound)
    }
}

impl FromStr for AttributeBound {
    type Err = MaskError;

    /// Parses `elongation<10` or `area_m2 > 5`
    fn from_str(s: &str) -> Result<Self> {
        let (name, value, is_less) = if let Some((name, value)) = s.split_once('<') {
            (name, value, true)
        } else if let Some((name, value)) = s.split_once('>') {
            (name, value, false)
        } else {
            return Err(MaskError::invalid_config(format!(
                "expected `<attribute><|><value>`, got `{s}`"
            )));
        };
        let attribute = Attribute::from_str(name.trim()).map_err(|_| {
            MaskError::invalid_config(format!(
                "unknown attribute `{}`, expected one of {:?}",
                name.trim(),
                Attribute::VARIANTS
            ))
        })?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| MaskError::invalid_config(format!("invalid bound value in `{s}`")))?;
        if value.is_nan() {
            return Err(MaskError::invalid_config(format!("bound in `{s}` is NaN")));
        }
        Ok(if is_less {
            Self::less_than(attribute, value)
        } else {
            Self::greater_than(attribute, value)
        })
    }
}

/// Conjunction of attribute bounds; an empty filter keeps everything
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct AttributeFilter {
    #[serde(default)]
    pub bounds: Vec<AttributeBound>,
}

impl AttributeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn less_than(mut self, attribute: Attribute, value: f64) -> Self {
        self.bounds.push(AttributeBound::less_than(attribute, value));
        self
    }

    pub fn greater_than(mut self, attribute: Attribute, value: f64) -> Self {
        self.bounds
            .push(AttributeBound::greater_than(attribute, value));
        self
    }

    /// Parse a list of expressions such as `["elongation<10", "area_m2>5"]`
    pub fn parse<S: AsRef<str>>(expressions: &[S]) -> Result<Self> {
        let bounds = expressions
            .iter()
            .map(|expression| expression.as_ref().parse())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { bounds })
    }

    pub fn matches(&self, attributes: &GeometricAttributes) -> bool {
        self.bounds.iter().all(|bound| bound.matches(attributes))
    }

    pub fn apply(&self, polygons: &[AttributedPolygon]) -> Vec<AttributedPolygon> {
        filter(polygons, |attributes| self.matches(attributes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VectorPolygon;
    use geo_types::polygon;
    use proptest::prelude::*;

    fn attributed(label: u32, area_m2: f64, elongation: f64) -> AttributedPolygon {
        AttributedPolygon {
            polygon: VectorPolygon {
                label,
                score: 1.0,
                geometry: polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)],
            },
            attributes: GeometricAttributes {
                area_m2,
                perimeter_m: 4.0,
                elongation,
                mbr_major_m: 1.0,
                mbr_minor_m: 1.0,
                orientation_deg: 0.0,
                compactness: 0.8,
                convexity: 1.0,
                centroid_x: 0.0,
                centroid_y: 0.0,
                bbox: [0.0, 0.0, 1.0, 1.0],
                hole_count: 0,
            },
        }
    }

    #[test]
    fn test_filter_keeps_order_and_source() {
        let polygons = vec![
            attributed(1, 10.0, 1.0),
            attributed(2, 3.0, 2.0),
            attributed(3, 50.0, 25.0),
            attributed(4, 7.0, f64::INFINITY),
        ];
        let kept = filter(&polygons, |a| a.elongation < 10.0 && a.area_m2 > 5.0);
        assert_eq!(kept.iter().map(|p| p.label()).collect::<Vec<_>>(), vec![1]);
        assert_eq!(polygons.len(), 4);
    }

    #[test]
    fn test_parse_bounds() {
        let bound: AttributeBound = "elongation<10".parse().expect("valid bound");
        assert_eq!(bound, AttributeBound::less_than(Attribute::Elongation, 10.0));
        let bound: AttributeBound = " area_m2 > 5 ".parse().expect("valid bound");
        assert_eq!(bound, AttributeBound::greater_than(Attribute::AreaM2, 5.0));

        assert!("width<3".parse::<AttributeBound>().is_err());
        assert!("elongation=3".parse::<AttributeBound>().is_err());
        assert!("elongation<abc".parse::<AttributeBound>().is_err());
    }

    #[test]
    fn test_attribute_filter_conjunction() {
        let filter = AttributeFilter::new()
            .less_than(Attribute::Elongation, 10.0)
            .greater_than(Attribute::AreaM2, 5.0);
        let polygons = vec![
            attributed(1, 10.0, 1.0),
            attributed(2, 5.0, 1.0),
            attributed(3, 50.0, 10.0),
        ];
        let kept = filter.apply(&polygons);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].label(), 1);

        assert_eq!(AttributeFilter::new().apply(&polygons).len(), 3);
        assert_eq!(
            AttributeFilter::parse(&["elongation<10", "area_m2>5"]).expect("valid"),
            filter
        );
    }

    #[test]
    fn test_filter_serializes_as_snake_case() {
        let filter = AttributeFilter::new().less_than(Attribute::Elongation, 10.0);
        let json = serde_json::to_value(&filter).expect("serializable");
        assert_eq!(
            json,
            serde_json::json!({ "bounds": [{ "attribute": "elongation", "less_than": 10.0 }] })
        );
    }

    proptest! {
        #[test]
        fn prop_filter_is_subset_and_idempotent(
            values in proptest::collection::vec((0.0f64..100.0, 1.0f64..40.0), 0..30),
            max_elongation in 1.0f64..40.0,
        ) {
            let polygons: Vec<_> = values
                .iter()
                .enumerate()
                .map(|(i, &(area, elongation))| attributed(i as u32 + 1, area, elongation))
                .collect();
            let predicate = |a: &GeometricAttributes| a.elongation < max_elongation;
            let once = filter(&polygons, predicate);
            prop_assert!(once.iter().all(|p| polygons.contains(p)));
            prop_assert!(once.len() <= polygons.len());
            let twice = filter(&once, predicate);
            prop_assert_eq!(once, twice);
        }
    }
}
