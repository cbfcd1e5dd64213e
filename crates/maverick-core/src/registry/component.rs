//! Component traits and their type-erased wrappers.
//!
//! `Action`, `Agent`, and `Generator` use native async fn in traits (RPITIT,
//! Rust 2024 edition). Since RPITIT traits cannot be used as trait objects
//! directly, each has an object-safe `*Dyn` twin with boxed futures, a
//! blanket impl, and a `Box*` wrapper that delegates -- the registries store
//! the wrappers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

/// Keyword-style arguments for an action call.
pub type Kwargs = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// A named callable invoked by `python` steps.
///
/// Receives the step's resolved `kwargs` and produces an arbitrary JSON
/// value. Failures are reported through `anyhow::Error`; the executor
/// records them without retrying.
pub trait Action: Send + Sync {
    fn call(&self, kwargs: Kwargs) -> impl Future<Output = anyhow::Result<Value>> + Send;
}

/// Object-safe version of [`Action`] with boxed futures.
trait ActionDyn: Send + Sync {
    fn call_boxed<'a>(
        &'a self,
        kwargs: Kwargs,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'a>>;
}

impl<T: Action> ActionDyn for T {
    fn call_boxed<'a>(
        &'a self,
        kwargs: Kwargs,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'a>> {
        Box::pin(self.call(kwargs))
    }
}

/// Type-erased action for registry storage.
pub struct BoxAction {
    inner: Box<dyn ActionDyn>,
}

impl std::fmt::Debug for BoxAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxAction").finish_non_exhaustive()
    }
}

impl BoxAction {
    /// Wrap a concrete [`Action`].
    pub fn new<T: Action + 'static>(action: T) -> Self {
        Self {
            inner: Box::new(action),
        }
    }

    /// Wrap an async closure as an action.
    pub fn from_fn<F, Fut>(func: F) -> Self
    where
        F: Fn(Kwargs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::new(FnAction { func })
    }

    pub async fn call(&self, kwargs: Kwargs) -> anyhow::Result<Value> {
        self.inner.call_boxed(kwargs).await
    }
}

struct FnAction<F> {
    func: F,
}

impl<F, Fut> Action for FnAction<F>
where
    F: Fn(Kwargs) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    fn call(&self, kwargs: Kwargs) -> impl Future<Output = anyhow::Result<Value>> + Send {
        (self.func)(kwargs)
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// A stateful component with an `execute(context) -> output` contract,
/// invoked by `agent` steps. Concrete LLM-backed agents live outside the
/// engine; the engine only needs this contract and the declared tool
/// capabilities.
pub trait Agent: Send + Sync {
    fn execute(&self, context: Value) -> impl Future<Output = anyhow::Result<Value>> + Send;

    /// Tools this agent is allowed to use. Informational for hosts.
    fn tool_capabilities(&self) -> &[String] {
        &[]
    }
}

trait AgentDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        context: Value,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'a>>;

    fn tool_capabilities(&self) -> &[String];
}

impl<T: Agent> AgentDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        context: Value,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'a>> {
        Box::pin(self.execute(context))
    }

    fn tool_capabilities(&self) -> &[String] {
        Agent::tool_capabilities(self)
    }
}

/// Type-erased agent for registry storage.
pub struct BoxAgent {
    inner: Box<dyn AgentDyn>,
}

impl BoxAgent {
    pub fn new<T: Agent + 'static>(agent: T) -> Self {
        Self {
            inner: Box::new(agent),
        }
    }

    pub async fn execute(&self, context: Value) -> anyhow::Result<Value> {
        self.inner.execute_boxed(context).await
    }

    pub fn tool_capabilities(&self) -> &[String] {
        self.inner.tool_capabilities()
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// A stateful component with a `generate(context) -> text` contract,
/// invoked by `generate` steps.
pub trait Generator: Send + Sync {
    fn generate(&self, context: Value) -> impl Future<Output = anyhow::Result<String>> + Send;
}

trait GeneratorDyn: Send + Sync {
    fn generate_boxed<'a>(
        &'a self,
        context: Value,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>>;
}

impl<T: Generator> GeneratorDyn for T {
    fn generate_boxed<'a>(
        &'a self,
        context: Value,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(self.generate(context))
    }
}

/// Type-erased generator for registry storage.
pub struct BoxGenerator {
    inner: Box<dyn GeneratorDyn>,
}

impl BoxGenerator {
    pub fn new<T: Generator + 'static>(generator: T) -> Self {
        Self {
            inner: Box::new(generator),
        }
    }

    pub async fn generate(&self, context: Value) -> anyhow::Result<String> {
        self.inner.generate_boxed(context).await
    }
}

// ---------------------------------------------------------------------------
// Context builder
// ---------------------------------------------------------------------------

/// A pure binary function `(inputs, step_outputs) -> context_value`.
///
/// `step_outputs` maps each recorded step name to `{"output": ...}`. The
/// result becomes the context payload of an agent or generator step.
#[derive(Clone)]
pub struct ContextBuilder {
    func: Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>,
}

impl ContextBuilder {
    pub fn new(func: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static) -> Self {
        Self {
            func: Arc::new(func),
        }
    }

    pub fn build(&self, inputs: &Value, step_outputs: &Value) -> Value {
        (self.func)(inputs, step_outputs)
    }
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fn_action_roundtrip() {
        let action = BoxAction::from_fn(|kwargs| async move {
            let n = kwargs.get("n").and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(n * 2))
        });
        let mut kwargs = Kwargs::new();
        kwargs.insert("n".to_string(), json!(21));
        assert_eq!(action.call(kwargs).await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn box_agent_delegates() {
        struct EchoAgent;
        impl Agent for EchoAgent {
            async fn execute(&self, context: Value) -> anyhow::Result<Value> {
                Ok(json!({"echo": context}))
            }

            fn tool_capabilities(&self) -> &[String] {
                static CAPS: std::sync::OnceLock<Vec<String>> = std::sync::OnceLock::new();
                CAPS.get_or_init(|| vec!["read_file".to_string()])
            }
        }

        let agent = BoxAgent::new(EchoAgent);
        let out = agent.execute(json!({"q": 1})).await.unwrap();
        assert_eq!(out["echo"]["q"], json!(1));
        assert_eq!(agent.tool_capabilities(), ["read_file".to_string()]);
    }

    #[tokio::test]
    async fn box_generator_delegates() {
        struct StaticGen;
        impl Generator for StaticGen {
            async fn generate(&self, _context: Value) -> anyhow::Result<String> {
                Ok("generated text".to_string())
            }
        }
        let generator = BoxGenerator::new(StaticGen);
        assert_eq!(
            generator.generate(Value::Null).await.unwrap(),
            "generated text"
        );
    }

    #[test]
    fn context_builder_is_pure_binary() {
        let builder = ContextBuilder::new(|inputs, step_outputs| {
            json!({"in": inputs, "out": step_outputs})
        });
        let built = builder.build(&json!({"a": 1}), &json!({"s": {"output": 2}}));
        assert_eq!(built["in"]["a"], json!(1));
        assert_eq!(built["out"]["s"]["output"], json!(2));
    }

    #[tokio::test]
    async fn action_error_propagates() {
        let action = BoxAction::from_fn(|_| async { anyhow::bail!("deliberate failure") });
        let err = action.call(Kwargs::new()).await.unwrap_err();
        assert!(err.to_string().contains("deliberate failure"));
    }
}
