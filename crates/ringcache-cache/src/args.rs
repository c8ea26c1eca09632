//! Call signatures and argument normalization for memoized functions.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::CacheError;

/// Identity of a receiver in per-instance memoization.
///
/// The default is the `Debug` representation, so structurally equal
/// receivers share a namespace. Override it to choose what makes two
/// receivers "the same".
pub trait CacheIdentity: fmt::Debug {
    /// Token identifying this receiver in cache keys.
    fn cache_identity(&self) -> String {
        format!("{self:?}")
    }
}

impl CacheIdentity for () {}

/// What a memoized function is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Receiver {
    /// A free function.
    #[default]
    Free,
    /// A method on an instance; the instance's identity joins the namespace.
    Instance,
    /// A class-level method; the class name joins the namespace.
    Class(String),
}

/// A declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Value used when the caller omits it.
    pub default: Option<Value>,
}

/// Declared shape of a memoized function.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    module: String,
    qualname: String,
    params: Vec<Param>,
    receiver: Receiver,
}

impl Signature {
    /// A free function `qualname` in `module` with no parameters yet.
    pub fn new(module: impl Into<String>, qualname: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            qualname: qualname.into(),
            params: Vec::new(),
            receiver: Receiver::Free,
        }
    }

    /// Append a required parameter.
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Append a parameter with a default.
    pub fn param_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    /// Bind to an instance receiver.
    pub fn method(mut self) -> Self {
        self.receiver = Receiver::Instance;
        self
    }

    /// Bind to `class` as a class-level method.
    pub fn class_method(mut self, class: impl Into<String>) -> Self {
        self.receiver = Receiver::Class(class.into());
        self
    }

    /// Module path of the function.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Qualified name within the module.
    pub fn qualname(&self) -> &str {
        &self.qualname
    }

    /// Declared parameters, in order.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// How the function is bound.
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    /// Normalize `args` against the declared parameters.
    ///
    /// Each parameter takes its keyword value if given, else the positional
    /// value at its index, else its default, else null. Positional values
    /// past the declared parameters and unknown keywords are kept as extras.
    pub fn bind(&self, args: CallArgs) -> BoundArgs {
        let CallArgs {
            positional,
            mut keyword,
        } = args;

        let named = self
            .params
            .iter()
            .enumerate()
            .map(|(i, param)| {
                let value = keyword
                    .remove(&param.name)
                    .or_else(|| positional.get(i).cloned())
                    .or_else(|| param.default.clone())
                    .unwrap_or(Value::Null);
                (param.name.clone(), value)
            })
            .collect();

        let extra_positional = positional.into_iter().skip(self.params.len()).collect();

        BoundArgs {
            named,
            extra_positional,
            extra_keyword: keyword,
        }
    }
}

/// Arguments of one call, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    /// Append any serializable value as a positional argument.
    pub fn try_arg<T: Serialize>(self, value: &T) -> Result<Self, CacheError> {
        Ok(self.arg(serde_json::to_value(value)?))
    }

    /// Set any serializable value as a keyword argument.
    pub fn try_kwarg<T: Serialize>(
        self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self, CacheError> {
        Ok(self.kwarg(name, serde_json::to_value(value)?))
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

/// Arguments normalized against a [`Signature`].
#[derive(Debug, Clone, PartialEq)]
pub struct BoundArgs {
    named: Vec<(String, Value)>,
    extra_positional: Vec<Value>,
    extra_keyword: BTreeMap<String, Value>,
}

impl BoundArgs {
    /// Value bound to the declared parameter `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Value bound to `name`, deserialized.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, CacheError> {
        let value = self
            .get(name)
            .ok_or_else(|| CacheError::Arguments(format!("no parameter named {name:?}")))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Declared parameters with their values, in declaration order.
    pub fn named(&self) -> &[(String, Value)] {
        &self.named
    }

    /// Positional values beyond the declared parameters.
    pub fn extra_args(&self) -> &[Value] {
        &self.extra_positional
    }

    /// Undeclared keyword values, sorted by name.
    pub fn extra_kwargs(&self) -> &BTreeMap<String, Value> {
        &self.extra_keyword
    }

    /// Stable text form used in key derivation.
    pub(crate) fn canonical(&self, identity: Option<&str>) -> String {
        let positional: Vec<Value> = identity
            .map(|id| Value::String(id.to_string()))
            .into_iter()
            .chain(self.named.iter().map(|(_, v)| v.clone()))
            .chain(self.extra_positional.iter().cloned())
            .collect();
        let keyword: Map<String, Value> = self
            .extra_keyword
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        format!("{}{}", Value::Array(positional), Value::Object(keyword))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn signature() -> Signature {
        Signature::new("shop", "price")
            .param("item")
            .param_default("currency", "EUR")
            .param("discount")
    }

    #[test]
    fn test_positional_keyword_and_default_are_equivalent() {
        let sig = signature();
        let a = sig.bind(CallArgs::new().arg("apple"));
        let b = sig.bind(CallArgs::new().kwarg("item", "apple"));
        let c = sig.bind(CallArgs::new().arg("apple").arg("EUR"));
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.get("currency"), Some(&json!("EUR")));
        assert_eq!(a.get("discount"), Some(&Value::Null));
    }

    #[test]
    fn test_keyword_wins_over_positional() {
        let bound = signature().bind(CallArgs::new().arg("apple").arg("USD").kwarg("currency", "GBP"));
        assert_eq!(bound.get_as::<String>("currency").unwrap(), "GBP");
    }

    #[test]
    fn test_extras_are_kept_and_sorted() {
        let bound = signature().bind(
            CallArgs::new()
                .arg("a")
                .arg("b")
                .arg(1)
                .arg(true)
                .kwarg("z", 1)
                .kwarg("y", 2),
        );
        assert_eq!(bound.extra_args(), &[json!(true)]);
        let names: Vec<_> = bound.extra_kwargs().keys().cloned().collect();
        assert_eq!(names, ["y", "z"]);
        assert_eq!(bound.canonical(None), r#"["a","b",1,true]{"y":2,"z":1}"#);
    }

    #[test]
    fn test_identity_leads_canonical_form() {
        let bound = Signature::new("m", "f").param("x").method().bind(CallArgs::new().arg(3));
        assert_eq!(bound.canonical(Some("Obj(1)")), r#"["Obj(1)",3]{}"#);
    }

    #[test]
    fn test_get_as_reports_unknown_and_mismatched() {
        let bound = signature().bind(CallArgs::new().arg("apple"));
        assert!(matches!(bound.get_as::<u32>("item"), Err(CacheError::Arguments(_))));
        assert!(matches!(bound.get_as::<u32>("nope"), Err(CacheError::Arguments(_))));
    }

    #[test]
    fn test_identity_defaults_to_debug() {
        #[derive(Debug)]
        struct Account {
            id: u32,
        }
        impl CacheIdentity for Account {}

        assert_eq!(Account { id: 9 }.cache_identity(), "Account { id: 9 }");
        assert_eq!(().cache_identity(), "()");
    }
}
