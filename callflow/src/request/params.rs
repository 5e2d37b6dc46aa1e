//! String-keyed, string-valued request parameters.

use std::collections::BTreeMap;

/// The wire form of a request's parameters.
pub type Parameters = BTreeMap<String, String>;

/// Values that can be rendered as a parameter.
///
/// Returning `None` omits the parameter.
pub trait ParamValue {
    /// Renders the value in its wire form.
    fn to_param(&self) -> Option<String>;
}

impl ParamValue for str {
    fn to_param(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl ParamValue for String {
    fn to_param(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl ParamValue for bool {
    fn to_param(&self) -> Option<String> {
        Some(if *self { "1" } else { "0" }.to_string())
    }
}

macro_rules! decimal_param {
    ($($ty:ty),*) => {
        $(impl ParamValue for $ty {
            fn to_param(&self) -> Option<String> {
                Some(self.to_string())
            }
        })*
    };
}

decimal_param!(i32, i64, u32, u64, usize, f32, f64);

impl<T: ParamValue + ?Sized> ParamValue for &T {
    fn to_param(&self) -> Option<String> {
        (**self).to_param()
    }
}

impl<T: ParamValue> ParamValue for Option<T> {
    fn to_param(&self) -> Option<String> {
        self.as_ref().and_then(|v| v.to_param())
    }
}

/// Builder for a parameter set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Parameters);

impl Params {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a parameter. Unset optional values are skipped.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl ParamValue) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a parameter in place. Returns true if a value was stored.
    pub fn insert(&mut self, name: impl Into<String>, value: impl ParamValue) -> bool {
        match value.to_param() {
            Some(value) => {
                self.0.insert(name.into(), value);
                true
            }
            None => false,
        }
    }

    /// Returns a parameter value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the parameters in wire form.
    #[must_use]
    pub fn into_inner(self) -> Parameters {
        self.0
    }
}

impl From<Parameters> for Params {
    fn from(params: Parameters) -> Self {
        Self(params)
    }
}

impl<K: Into<String>, V: ParamValue> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

impl<K: Into<String>, V: ParamValue> Extend<(K, V)> for Params {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl IntoIterator for Params {
    type Item = (String, String);
    type IntoIter = std::collections::btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
