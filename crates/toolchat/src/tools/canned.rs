use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use toolchat_core::tool::{Error as ToolError, Tool, schema_for};

#[derive(Deserialize, JsonSchema)]
#[allow(dead_code)]
struct WeatherParameters {
    #[schemars(description = "The city and country, e.g. \"San Francisco, CA\"")]
    location: String,
}

#[derive(Deserialize, JsonSchema)]
#[allow(dead_code)]
struct TimeParameters {
    #[schemars(description = "Timezone identifier, e.g. \"America/New_York\"")]
    timezone: String,
}

/// A tool that answers every call with the same text.
///
/// Useful as a stand-in for tools that have no real backend yet, or to
/// script a conversation. Arguments are still validated against the
/// parameter schema.
#[derive(Clone, Debug)]
pub struct CannedTool {
    name: String,
    description: String,
    parameter_schema: Value,
    response: String,
}

impl CannedTool {
    /// Creates a canned tool.
    pub fn new<S1, S2, S3>(
        name: S1,
        description: S2,
        parameter_schema: Value,
        response: S3,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema,
            response: response.into(),
        }
    }

    /// The `get_weather` tool with a fixed forecast.
    pub fn get_weather() -> Self {
        Self::new(
            "get_weather",
            "Get current weather information for a location",
            schema_for::<WeatherParameters>(),
            "It's sunny and 72°F in your location with light clouds.",
        )
    }

    /// The `get_time` tool with a fixed clock.
    pub fn get_time() -> Self {
        Self::new(
            "get_time",
            "Get current time in a specific timezone",
            schema_for::<TimeParameters>(),
            "The current time is 2:30 PM on Tuesday, January 15, 2025.",
        )
    }

    /// Replaces the response text.
    #[inline]
    pub fn with_response<S: Into<String>>(mut self, response: S) -> Self {
        self.response = response.into();
        self
    }
}

impl Tool for CannedTool {
    type Input = Value;
    type Output = String;

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: Value,
    ) -> impl Future<Output = Result<String, ToolError>> + Send + 'static {
        trace!("canned call {}({input})", self.name);
        std::future::ready(Ok(self.response.clone()))
    }
}
