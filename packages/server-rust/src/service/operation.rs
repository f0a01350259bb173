//! Operation tables: explicit name -> handler dispatch for hosted services.
//!
//! A service builds its table once at construction. Each entry pairs the
//! advertised [`Operation`] signature with an async handler; the signatures
//! become the operation list of the service description.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tessera_core::{FromValue, Operation, Value, ValueError};

// ---------------------------------------------------------------------------
// Reply / errors
// ---------------------------------------------------------------------------

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Send a response carrying this value.
    Value(Value),
    /// Send a response with no value.
    Void,
    /// Do not respond at all; the caller will observe a timeout.
    Aborted,
}

impl Reply {
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }
}

/// Errors returned by operation handlers.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("unknown operation: {name}")]
    UnknownOperation { name: String },
    #[error("operation {op} expects {expected} argument(s), got {found}")]
    Arity {
        op: String,
        expected: usize,
        found: usize,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ValueError),
    #[error("service is shutting down")]
    Unavailable,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Reply, OperationError>> + Send>>;

type Handler = Arc<dyn Fn(Args) -> HandlerFuture + Send + Sync>;

// ---------------------------------------------------------------------------
// Args
// ---------------------------------------------------------------------------

/// Positional arguments of one invocation, consumed front to back.
#[derive(Debug)]
pub struct Args {
    values: VecDeque<Value>,
}

impl Args {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values: values.into(),
        }
    }

    /// Takes and decodes the next argument.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the argument is missing or has the wrong
    /// kind.
    pub fn next<T: FromValue>(&mut self) -> Result<T, OperationError> {
        let value = self.values.pop_front().unwrap_or(Value::Null);
        Ok(T::from_value(value)?)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Remaining arguments as raw values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values.into()
    }
}

// ---------------------------------------------------------------------------
// OperationTable
// ---------------------------------------------------------------------------

struct Entry {
    signature: Operation,
    handler: Handler,
}

/// Maps operation names to typed handlers.
///
/// Invocations whose argument count differs from the registered signature are
/// rejected with `OperationError::Arity` before the handler runs.
#[derive(Default)]
pub struct OperationTable {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for OperationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationTable")
            .field("operations", &self.index.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OperationTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under the signature's operation name, replacing any
    /// earlier registration with the same name.
    pub fn register<F, Fut>(&mut self, signature: Operation, handler: F)
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, OperationError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args| Box::pin(handler(args)));
        let name = signature.op_name.clone();
        let entry = Entry { signature, handler };
        if let Some(&i) = self.index.get(&name) {
            self.entries[i] = entry;
        } else {
            self.index.insert(name, self.entries.len());
            self.entries.push(entry);
        }
    }

    /// Builder-style variant of [`register`](Self::register).
    #[must_use]
    pub fn with<F, Fut>(mut self, signature: Operation, handler: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, OperationError>> + Send + 'static,
    {
        self.register(signature, handler);
        self
    }

    #[must_use]
    pub fn contains(&self, op_name: &str) -> bool {
        self.index.contains_key(op_name)
    }

    /// Registered signatures in registration order.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.entries.iter().map(|e| e.signature.clone()).collect()
    }

    /// Dispatches `op_name` with `params`.
    pub fn invoke(&self, op_name: &str, params: Vec<Value>) -> HandlerFuture {
        let Some(entry) = self.index.get(op_name).map(|&i| &self.entries[i]) else {
            let name = op_name.to_string();
            return Box::pin(async move { Err(OperationError::UnknownOperation { name }) });
        };

        let expected = entry.signature.param_types.len();
        if params.len() != expected {
            let op = op_name.to_string();
            let found = params.len();
            return Box::pin(async move {
                Err(OperationError::Arity {
                    op,
                    expected,
                    found,
                })
            });
        }

        (entry.handler)(Args::new(params))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tessera_core::ValueKind;

    use super::*;

    fn add_op() -> Operation {
        Operation::new("add", vec![ValueKind::Int, ValueKind::Int], Some(ValueKind::Int))
    }

    fn table() -> OperationTable {
        OperationTable::new()
            .with(add_op(), |mut args| async move {
                let a: i64 = args.next()?;
                let b: i64 = args.next()?;
                Ok::<_, OperationError>(Reply::value(a + b))
            })
            .with(Operation::new("ping", vec![], None), |_| async {
                Ok(Reply::Void)
            })
    }

    #[tokio::test]
    async fn dispatches_by_name() {
        let reply = table()
            .invoke("add", vec![Value::Int(2), Value::Int(3)])
            .await
            .unwrap();
        assert_eq!(reply, Reply::Value(Value::Int(5)));

        let reply = table().invoke("ping", vec![]).await.unwrap();
        assert_eq!(reply, Reply::Void);
    }

    #[tokio::test]
    async fn unknown_operation() {
        let err = table().invoke("mul", vec![]).await.unwrap_err();
        assert!(matches!(err, OperationError::UnknownOperation { name } if name == "mul"));
    }

    #[tokio::test]
    async fn arity_is_checked_before_handler() {
        let err = table()
            .invoke("add", vec![Value::Int(2)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OperationError::Arity {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn wrong_argument_kind() {
        let err = table()
            .invoke("add", vec![Value::Int(2), Value::from("3")])
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::InvalidArgument(_)));
    }

    #[test]
    fn operations_keep_registration_order() {
        let names: Vec<String> = table()
            .operations()
            .into_iter()
            .map(|op| op.op_name)
            .collect();
        assert_eq!(names, vec!["add", "ping"]);
    }

    #[test]
    fn re_register_replaces_entry() {
        let mut t = table();
        t.register(add_op().with_cost(9.0), |_| async { Ok(Reply::Void) });
        let ops = t.operations();
        assert_eq!(ops.len(), 2);
        assert!((ops[0].op_cost - 9.0).abs() < f64::EPSILON);
    }
}
