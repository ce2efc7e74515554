//! Typed access to a stage's parameters.
//!
//! Every getter takes a default that applies when the key is absent.
//! String values of the exact form `{{name}}` are first replaced by the
//! run's variable of that name; an unbound variable counts as absent.
//! Keys containing dots (`ksize.width`) are looked up literally first and
//! then as a nested path (`{"ksize": {"width": 3}}`).

use serde_json::Value;

use crate::registry::StageError;
use crate::state::Variables;

/// Read-only view of one stage's parameters.
#[derive(Debug, Clone, Copy)]
pub struct Params<'a> {
    raw: &'a Value,
    variables: &'a Variables,
}

/// A parameter value after variable substitution.
enum Resolved<'a> {
    Json(&'a Value),
    Bound(&'a str),
}

impl<'a> Params<'a> {
    /// Wrap a stage element and the variables it resolves against.
    #[must_use]
    pub const fn new(raw: &'a Value, variables: &'a Variables) -> Self {
        Self { raw, variables }
    }

    /// The underlying JSON element.
    #[must_use]
    pub const fn raw(&self) -> &'a Value {
        self.raw
    }

    /// Parameters of a nested object, resolved against the same variables.
    #[must_use]
    pub const fn nested(&self, raw: &'a Value) -> Self {
        Self::new(raw, self.variables)
    }

    /// Returns `true` if `key` resolves to a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.resolve(key).is_some()
    }

    fn lookup(&self, key: &str) -> Option<&'a Value> {
        if let Some(value) = self.raw.get(key) {
            return Some(value);
        }
        if !key.contains('.') {
            return None;
        }
        key.split('.')
            .try_fold(self.raw, |node, segment| node.get(segment))
    }

    fn resolve(&self, key: &str) -> Option<Resolved<'a>> {
        let value = self.lookup(key)?;
        if value.is_null() {
            return None;
        }
        if let Some(var) = value.as_str().and_then(placeholder) {
            return self.variables.get(var).map(Resolved::Bound);
        }
        Some(Resolved::Json(value))
    }

    /// String parameter.
    ///
    /// `{{name}}` placeholders embedded in a longer string are also
    /// replaced when the variable is bound.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Invalid`] if the value is not a string.
    pub fn string(&self, key: &str, default: &str) -> Result<String, StageError> {
        Ok(self
            .optional_string(key)?
            .unwrap_or_else(|| default.to_owned()))
    }

    /// String parameter with no default.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Invalid`] if the value is not a string.
    pub fn optional_string(&self, key: &str) -> Result<Option<String>, StageError> {
        match self.resolve(key) {
            None => Ok(None),
            Some(Resolved::Bound(text)) => Ok(Some(text.to_owned())),
            Some(Resolved::Json(Value::String(text))) => Ok(Some(interpolate(text, self.variables))),
            Some(Resolved::Json(other)) => Err(type_error(key, "a string", other)),
        }
    }

    /// Floating-point parameter.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Invalid`] if the value is not numeric.
    pub fn f64(&self, key: &str, default: f64) -> Result<f64, StageError> {
        match self.resolve(key) {
            None => Ok(default),
            Some(Resolved::Bound(text)) => text
                .trim()
                .parse()
                .map_err(|_| StageError::invalid(format!("expected a number for {key}, got '{text}'"))),
            Some(Resolved::Json(value)) => value
                .as_f64()
                .ok_or_else(|| type_error(key, "a number", value)),
        }
    }

    /// Single-precision convenience over [`Self::f64`].
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Invalid`] if the value is not numeric.
    #[allow(clippy::cast_possible_truncation)]
    pub fn f32(&self, key: &str, default: f32) -> Result<f32, StageError> {
        self.f64(key, f64::from(default)).map(|v| v as f32)
    }

    /// Integer parameter. Integral floats such as `3.0` are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Invalid`] if the value is not an integer.
    pub fn i64(&self, key: &str, default: i64) -> Result<i64, StageError> {
        match self.resolve(key) {
            None => Ok(default),
            Some(Resolved::Bound(text)) => text
                .trim()
                .parse()
                .map_err(|_| StageError::invalid(format!("expected an integer for {key}, got '{text}'"))),
            Some(Resolved::Json(value)) => {
                as_integer(value).ok_or_else(|| type_error(key, "an integer", value))
            }
        }
    }

    /// 32-bit integer parameter.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Invalid`] if the value is not an integer or
    /// does not fit in `i32`.
    pub fn i32(&self, key: &str, default: i32) -> Result<i32, StageError> {
        let value = self.i64(key, i64::from(default))?;
        i32::try_from(value)
            .map_err(|_| StageError::invalid(format!("{key} is out of range: {value}")))
    }

    /// Boolean parameter. Bound variables accept `true`/`false`/`1`/`0`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Invalid`] if the value is not a boolean.
    pub fn bool(&self, key: &str, default: bool) -> Result<bool, StageError> {
        match self.resolve(key) {
            None => Ok(default),
            Some(Resolved::Bound(text)) => match text.trim() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                other => Err(StageError::invalid(format!(
                    "expected a boolean for {key}, got '{other}'"
                ))),
            },
            Some(Resolved::Json(value)) => value
                .as_bool()
                .ok_or_else(|| type_error(key, "a boolean", value)),
        }
    }

    /// Array of up to four numbers, such as a colour.
    ///
    /// Missing trailing components are taken from `default`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Invalid`] if the value is not an array of at
    /// most four numbers.
    pub fn scalar(&self, key: &str, default: [f64; 4]) -> Result<[f64; 4], StageError> {
        let Some(resolved) = self.resolve(key) else {
            return Ok(default);
        };
        let Resolved::Json(Value::Array(items)) = resolved else {
            return Err(StageError::invalid(format!(
                "expected {key} to be an array of numbers"
            )));
        };
        if items.len() > 4 {
            return Err(StageError::invalid(format!(
                "expected at most 4 components in {key}, got {}",
                items.len()
            )));
        }
        let mut scalar = default;
        for (slot, item) in scalar.iter_mut().zip(items) {
            *slot = item
                .as_f64()
                .ok_or_else(|| type_error(key, "an array of numbers", item))?;
        }
        Ok(scalar)
    }

    /// Array of integers with no default.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Invalid`] if the value is not an array of
    /// integers.
    pub fn int_array(&self, key: &str) -> Result<Option<Vec<i64>>, StageError> {
        let Some(resolved) = self.resolve(key) else {
            return Ok(None);
        };
        let Resolved::Json(Value::Array(items)) = resolved else {
            return Err(StageError::invalid(format!(
                "expected {key} to be an array of integers"
            )));
        };
        items
            .iter()
            .map(|item| as_integer(item).ok_or_else(|| type_error(key, "an array of integers", item)))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// Enumerated string parameter, parsed against `choices`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Invalid`] if the value is not one of the
    /// choice names.
    pub fn choice<T: Copy>(
        &self,
        key: &str,
        default: T,
        choices: &[(&str, T)],
    ) -> Result<T, StageError> {
        let Some(name) = self.optional_string(key)? else {
            return Ok(default);
        };
        choices
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|&(_, value)| value)
            .ok_or_else(|| {
                let known: Vec<&str> = choices.iter().map(|(c, _)| *c).collect();
                StageError::invalid(format!(
                    "unknown {key} '{name}', expected one of: {}",
                    known.join(", ")
                ))
            })
    }
}

/// Variable name of a whole-string `{{name}}` placeholder.
fn placeholder(text: &str) -> Option<&str> {
    let inner = text.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    let inner = inner.trim();
    (!inner.is_empty() && !inner.contains(['{', '}'])).then_some(inner)
}

/// Replace every bound `{{name}}` in `text`; unbound placeholders stay.
fn interpolate(text: &str, variables: &Variables) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let name = rest[start + 2..start + 2 + len].trim();
        out.push_str(&rest[..start]);
        match variables.get(name) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + len + 4]),
        }
        rest = &rest[start + len + 4..];
    }
    out.push_str(rest);
    out
}

#[allow(clippy::cast_possible_truncation)]
fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|v| v.fract() == 0.0 && v.abs() < 9.0e15)
            .map(|v| v as i64)
    })
}

fn type_error(key: &str, expected: &str, found: &Value) -> StageError {
    StageError::invalid(format!("expected {key} to be {expected}, got {found}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use serde_json::json;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs.iter().map(|&(k, v)| (k, v)).collect()
    }

    #[test]
    fn missing_key_uses_default() {
        let raw = json!({"op": "x"});
        let vars = Variables::new();
        let params = Params::new(&raw, &vars);
        assert_eq!(params.f64("fx", 1.5).unwrap(), 1.5);
        assert_eq!(params.i32("n", 3).unwrap(), 3);
        assert_eq!(params.string("code", "A").unwrap(), "A");
        assert!(params.bool("flag", true).unwrap());
    }

    #[test]
    fn null_counts_as_absent() {
        let raw = json!({"fx": null});
        let vars = Variables::new();
        assert_eq!(Params::new(&raw, &vars).f64("fx", 2.0).unwrap(), 2.0);
    }

    #[test]
    fn wrong_type_is_invalid() {
        let raw = json!({"fx": "fast", "n": 1.5, "flag": 3});
        let vars = Variables::new();
        let params = Params::new(&raw, &vars);
        assert!(matches!(params.f64("fx", 1.0), Err(StageError::Invalid(_))));
        assert!(matches!(params.i64("n", 1), Err(StageError::Invalid(_))));
        assert!(matches!(params.bool("flag", false), Err(StageError::Invalid(_))));
    }

    #[test]
    fn integral_float_is_an_integer() {
        let raw = json!({"n": 4.0});
        let vars = Variables::new();
        assert_eq!(Params::new(&raw, &vars).i64("n", 0).unwrap(), 4);
    }

    #[test]
    fn i32_out_of_range_is_invalid() {
        let raw = json!({"n": 5_000_000_000_i64});
        let vars = Variables::new();
        assert!(Params::new(&raw, &vars).i32("n", 0).is_err());
    }

    // --- Dotted key tests ---

    #[test]
    fn dotted_key_literal_wins() {
        let raw = json!({"ksize.width": 5, "ksize": {"width": 9}});
        let vars = Variables::new();
        assert_eq!(Params::new(&raw, &vars).i32("ksize.width", 3).unwrap(), 5);
    }

    #[test]
    fn dotted_key_falls_back_to_nested_path() {
        let raw = json!({"ksize": {"width": 9, "height": 7}});
        let vars = Variables::new();
        let params = Params::new(&raw, &vars);
        assert_eq!(params.i32("ksize.width", 3).unwrap(), 9);
        assert_eq!(params.i32("ksize.height", 3).unwrap(), 7);
        assert_eq!(params.i32("ksize.depth", 3).unwrap(), 3);
    }

    // --- Variable substitution tests ---

    #[test]
    fn placeholder_is_substituted_before_coercion() {
        let raw = json!({"fx": "{{scale}}", "n": "{{ count }}", "on": "{{flag}}"});
        let vars = vars(&[("scale", "0.25"), ("count", "12"), ("flag", "true")]);
        let params = Params::new(&raw, &vars);
        assert_eq!(params.f64("fx", 1.0).unwrap(), 0.25);
        assert_eq!(params.i64("n", 0).unwrap(), 12);
        assert!(params.bool("on", false).unwrap());
    }

    #[test]
    fn unbound_placeholder_uses_default() {
        let raw = json!({"fx": "{{scale}}", "code": "{{code}}"});
        let vars = Variables::new();
        let params = Params::new(&raw, &vars);
        assert_eq!(params.f64("fx", 0.5).unwrap(), 0.5);
        assert_eq!(params.string("code", "CV_BGR2GRAY").unwrap(), "CV_BGR2GRAY");
        assert!(!params.contains("fx"));
    }

    #[test]
    fn bound_placeholder_with_bad_number_is_invalid() {
        let raw = json!({"fx": "{{scale}}"});
        let vars = vars(&[("scale", "big")]);
        assert!(Params::new(&raw, &vars).f64("fx", 1.0).is_err());
    }

    #[test]
    fn embedded_placeholders_interpolate_in_strings() {
        let raw = json!({"path": "out/{{run}}-{{missing}}.png"});
        let vars = vars(&[("run", "42")]);
        assert_eq!(
            Params::new(&raw, &vars).string("path", "").unwrap(),
            "out/42-{{missing}}.png",
        );
    }

    // --- Array tests ---

    #[test]
    fn scalar_fills_missing_components_from_default() {
        let raw = json!({"color": [10, 20]});
        let vars = Variables::new();
        assert_eq!(
            Params::new(&raw, &vars).scalar("color", [1.0, 2.0, 3.0, 4.0]).unwrap(),
            [10.0, 20.0, 3.0, 4.0],
        );
    }

    #[test]
    fn scalar_rejects_long_or_non_numeric_arrays() {
        let raw = json!({"a": [1, 2, 3, 4, 5], "b": ["red"], "c": 7});
        let vars = Variables::new();
        let params = Params::new(&raw, &vars);
        assert!(params.scalar("a", [0.0; 4]).is_err());
        assert!(params.scalar("b", [0.0; 4]).is_err());
        assert!(params.scalar("c", [0.0; 4]).is_err());
    }

    #[test]
    fn int_array_reads_integers() {
        let raw = json!({"fromTo": [2, 0]});
        let vars = Variables::new();
        let params = Params::new(&raw, &vars);
        assert_eq!(params.int_array("fromTo").unwrap(), Some(vec![2, 0]));
        assert_eq!(params.int_array("other").unwrap(), None);
    }

    #[test]
    fn choice_maps_names_and_lists_alternatives() {
        let raw = json!({"shape": "MORPH_CROSS", "bad": "MORPH_STAR"});
        let vars = Variables::new();
        let params = Params::new(&raw, &vars);
        let choices = [("MORPH_RECT", 0), ("MORPH_CROSS", 1)];
        assert_eq!(params.choice("shape", 0, &choices).unwrap(), 1);
        assert_eq!(params.choice("missing", 0, &choices).unwrap(), 0);
        let err = params.choice("bad", 0, &choices).unwrap_err();
        assert!(err.to_string().contains("MORPH_RECT, MORPH_CROSS"));
    }
}
