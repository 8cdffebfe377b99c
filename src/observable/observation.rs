//! What a sensor reports.

use serde_json::Value as JsonValue;

use crate::error::{BoxError, GdciError, GdciResult};
use crate::state::{Attributes, Ternary};

/// The sensing capability behind an `Observable`.
///
/// `get_observation` is the only required method. The loop hooks run on the
/// polling thread when the sensor is driven by an `Observer`.
pub trait Sensor: Send + 'static {
    /// Observe once. An `Err` marks the observable as not operating while
    /// keeping the previous result.
    fn get_observation(&mut self) -> Result<Observation, BoxError>;

    /// Called once on the polling thread before the first check.
    fn before_loop(&mut self) {}

    /// Called once on the polling thread after the last check.
    fn after_loop(&mut self) {}
}

/// A single sensor reading.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// A bare result.
    Value(Ternary),
    /// A result with secondary attributes.
    WithAttributes(Ternary, Attributes),
    /// Untyped JSON, validated by `Observable::check_observation`.
    ///
    /// Accepted shapes are `true`, `false`, `null`, or a two-element array
    /// `[true|false|null, {attributes}]`.
    Raw(JsonValue),
}

impl Observation {
    /// Split into result and attributes, validating raw JSON.
    pub(crate) fn into_parts(self, observable: &str) -> GdciResult<(Ternary, Attributes)> {
        match self {
            Self::Value(result) => Ok((result, Attributes::new())),
            Self::WithAttributes(result, attributes) => Ok((result, attributes)),
            Self::Raw(raw) => parse_raw(raw, observable),
        }
    }
}

fn json_ternary(value: &JsonValue) -> Option<Ternary> {
    match value {
        JsonValue::Bool(b) => Some(Ternary::from(*b)),
        JsonValue::Null => Some(Ternary::Undefined),
        _ => None,
    }
}

fn parse_raw(raw: JsonValue, observable: &str) -> GdciResult<(Ternary, Attributes)> {
    if let Some(result) = json_ternary(&raw) {
        return Ok((result, Attributes::new()));
    }

    if let JsonValue::Array(items) = &raw {
        if let [value, JsonValue::Object(map)] = items.as_slice() {
            if let Some(result) = json_ternary(value) {
                let attributes = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                return Ok((result, attributes));
            }
        }
    }

    Err(GdciError::Shape {
        observable: observable.to_string(),
        returned: raw.to_string(),
    })
}

impl From<Ternary> for Observation {
    fn from(value: Ternary) -> Self {
        Self::Value(value)
    }
}

impl From<bool> for Observation {
    fn from(value: bool) -> Self {
        Self::Value(value.into())
    }
}

impl From<Option<bool>> for Observation {
    fn from(value: Option<bool>) -> Self {
        Self::Value(value.into())
    }
}

impl<T: Into<Ternary>> From<(T, Attributes)> for Observation {
    fn from((value, attributes): (T, Attributes)) -> Self {
        Self::WithAttributes(value.into(), attributes)
    }
}

impl From<JsonValue> for Observation {
    fn from(value: JsonValue) -> Self {
        Self::Raw(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn parts(raw: JsonValue) -> GdciResult<(Ternary, Attributes)> {
        Observation::Raw(raw).into_parts("test")
    }

    #[test]
    fn raw_scalars_are_accepted() {
        assert_eq!(parts(json!(true)).unwrap().0, Ternary::True);
        assert_eq!(parts(json!(false)).unwrap().0, Ternary::False);
        assert_eq!(parts(json!(null)).unwrap().0, Ternary::Undefined);
    }

    #[test]
    fn raw_pair_carries_attributes() {
        let (result, attrs) = parts(json!([true, {"data": 3}])).unwrap();
        assert_eq!(result, Ternary::True);
        assert_eq!(attrs.get("data"), Some(&json!(3)));
    }

    #[test]
    fn malformed_shapes_are_rejected() {
        for bad in [
            json!([true, null, null]),
            json!([true, 5]),
            json!(["yes", {}]),
            json!(1),
            json!("true"),
            json!({"result": true}),
            json!([true]),
        ] {
            let err = parts(bad.clone()).unwrap_err();
            assert!(err.is_shape(), "expected shape error for {bad}");
        }
    }

    #[test]
    fn typed_conversions() {
        assert_eq!(Observation::from(true), Observation::Value(Ternary::True));
        assert_eq!(Observation::from(None::<bool>), Observation::Value(Ternary::Undefined));
        let attrs = Attributes::from([("k".to_string(), json!("v"))]);
        assert_eq!(
            Observation::from((false, attrs.clone())),
            Observation::WithAttributes(Ternary::False, attrs)
        );
    }
}
