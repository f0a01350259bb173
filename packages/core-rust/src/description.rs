//! Service descriptions: the directory records providers advertise to the registry.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Value, ValueKind};

/// Registration id assigned by the registry. `0` means "not registered".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RegisterId(pub u64);

impl RegisterId {
    /// Sentinel for a description the registry has not seen yet.
    pub const UNREGISTERED: Self = Self(0);

    #[must_use]
    pub fn is_registered(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Signature and cost of one remotely invokable operation.
///
/// Equality is structural over name, return type and positional parameter
/// types. `op_cost` is not part of identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub op_name: String,
    pub param_types: Vec<ValueKind>,
    /// `None` for operations that return nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<ValueKind>,
    #[serde(default)]
    pub op_cost: f64,
}

impl Operation {
    #[must_use]
    pub fn new(
        op_name: impl Into<String>,
        param_types: Vec<ValueKind>,
        return_type: Option<ValueKind>,
    ) -> Self {
        Self {
            op_name: op_name.into(),
            param_types,
            return_type,
            op_cost: 0.0,
        }
    }

    #[must_use]
    pub fn with_cost(mut self, op_cost: f64) -> Self {
        self.op_cost = op_cost;
        self
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.op_name == other.op_name
            && self.return_type == other.return_type
            && self.param_types == other.param_types
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.return_type {
            Some(kind) => write!(f, "{kind} ")?,
            None => f.write_str("void ")?,
        }
        write!(f, "{}(", self.op_name)?;
        for (i, kind) in self.param_types.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{kind}")?;
        }
        f.write_str(")")
    }
}

// ---------------------------------------------------------------------------
// ServiceDescription
// ---------------------------------------------------------------------------

/// Directory record advertising a provider's type, endpoint and operations.
///
/// Identity fields are fixed once the registry assigns `register_id`;
/// `custom_properties` and operation costs may change in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescription {
    #[serde(rename = "registerID", default)]
    pub register_id: RegisterId,
    /// Class of provider; the routing key for lookups.
    pub service_type: String,
    pub service_name: String,
    /// Transport address the provider listens on.
    pub service_endpoint: String,
    /// Nominal latency in logical time units, the fallback for call timeouts.
    #[serde(default)]
    pub response_time: u64,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub custom_properties: BTreeMap<String, Value>,
}

impl ServiceDescription {
    #[must_use]
    pub fn new(
        service_type: impl Into<String>,
        service_name: impl Into<String>,
        service_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            register_id: RegisterId::UNREGISTERED,
            service_type: service_type.into(),
            service_name: service_name.into(),
            service_endpoint: service_endpoint.into(),
            response_time: 0,
            operations: Vec::new(),
            custom_properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_response_time(mut self, response_time: u64) -> Self {
        self.response_time = response_time;
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Returns `true` if any advertised operation is named `op_name`.
    #[must_use]
    pub fn contains_operation(&self, op_name: &str) -> bool {
        self.operations.iter().any(|op| op.op_name == op_name)
    }

    #[must_use]
    pub fn operation(&self, op_name: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.op_name == op_name)
    }

    /// Cost of `op_name`, or `None` if this provider does not offer it.
    #[must_use]
    pub fn operation_cost(&self, op_name: &str) -> Option<f64> {
        self.operation(op_name).map(|op| op.op_cost)
    }

    /// Updates the cost of `op_name` in place. Returns `false` if absent.
    pub fn set_operation_cost(&mut self, op_name: &str, cost: f64) -> bool {
        match self.operations.iter_mut().find(|op| op.op_name == op_name) {
            Some(op) => {
                op.op_cost = cost;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn custom_property(&self, name: &str) -> Option<&Value> {
        self.custom_properties.get(name)
    }

    pub fn set_custom_property(&mut self, name: impl Into<String>, value: Value) {
        self.custom_properties.insert(name.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote_op() -> Operation {
        Operation::new(
            "quote",
            vec![ValueKind::String, ValueKind::Int],
            Some(ValueKind::Float),
        )
    }

    #[test]
    fn operation_equality_ignores_cost() {
        assert_eq!(quote_op().with_cost(5.0), quote_op().with_cost(2.0));
    }

    #[test]
    fn operation_equality_is_positional() {
        let swapped = Operation::new(
            "quote",
            vec![ValueKind::Int, ValueKind::String],
            Some(ValueKind::Float),
        );
        assert_ne!(quote_op(), swapped);

        let shorter = Operation::new("quote", vec![ValueKind::String], Some(ValueKind::Float));
        assert_ne!(quote_op(), shorter);
    }

    #[test]
    fn operation_display() {
        assert_eq!(quote_op().to_string(), "float quote(string,int)");
        let void_op = Operation::new("ping", vec![], None);
        assert_eq!(void_op.to_string(), "void ping()");
    }

    #[test]
    fn description_operation_queries() {
        let mut d = ServiceDescription::new("Pricer", "cheap", "pricer.cheap")
            .with_response_time(4)
            .with_operation(quote_op().with_cost(2.0));

        assert!(d.contains_operation("quote"));
        assert!(!d.contains_operation("order"));
        assert_eq!(d.operation_cost("quote"), Some(2.0));
        assert_eq!(d.operation_cost("order"), None);

        assert!(d.set_operation_cost("quote", 3.5));
        assert_eq!(d.operation_cost("quote"), Some(3.5));
        assert!(!d.set_operation_cost("order", 1.0));
    }

    #[test]
    fn new_description_is_unregistered() {
        let d = ServiceDescription::new("Pricer", "cheap", "pricer.cheap");
        assert!(!d.register_id.is_registered());
    }

    proptest::proptest! {
        #[test]
        fn cost_never_affects_operation_identity(a in -1e6_f64..1e6, b in -1e6_f64..1e6) {
            proptest::prop_assert_eq!(quote_op().with_cost(a), quote_op().with_cost(b));
        }
    }

    #[test]
    fn custom_properties_roundtrip_through_json() {
        let mut d = ServiceDescription::new("Pricer", "cheap", "pricer.cheap");
        d.set_custom_property("reliability", Value::Float(0.9));

        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"registerID\":0"));
        let back: ServiceDescription = serde_json::from_str(&json).unwrap();
        assert_eq!(back.custom_property("reliability"), Some(&Value::Float(0.9)));
    }
}
