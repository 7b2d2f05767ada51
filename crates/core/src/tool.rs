//! Tool call supports.

mod approval;
mod error;
mod object;
mod registry;

use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use approval::ToolApproval;
pub use error::{Error, ErrorKind};
pub use registry::{ToolRegistry, ToolRegistryBuilder};

/// The result of a tool call, as a JSON value.
pub type ToolResult = Result<Value, Error>;

/// A tool that can be called by the model.
///
/// Implementations of this trait should be stateless, and may not maintain any
/// internal state.
///
/// Arguments are validated against [`Tool::parameter_schema`] before they are
/// decoded into [`Tool::Input`], so `execute` only sees well-formed input.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned + Send;

    /// The type of output that the tool produces.
    type Output: Serialize;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`,
    /// and the future should be cancellation safe.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = Result<Self::Output, Error>> + Send + 'static;
}

/// Generates the parameter schema of a [`Tool::Input`] type.
#[inline]
pub fn schema_for<T: JsonSchema>() -> Value {
    schemars::schema_for!(T).to_value()
}
