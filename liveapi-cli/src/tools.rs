//! Built-in tools the model may call.

use liveapi_realtime::{FunctionCall, FunctionDeclaration, LiveRunnerBuilder, Result};
use serde_json::{Value, json};

pub fn current_time_declaration() -> FunctionDeclaration {
    FunctionDeclaration::new("get_current_time")
        .with_description("Get the current time")
        .with_parameters(json!({ "type": "OBJECT", "properties": {} }))
}

/// Local wall-clock time, e.g. `{"time": "14:03:27"}`.
pub fn current_time(_call: &FunctionCall) -> Result<Value> {
    Ok(json!({ "time": chrono::Local::now().format("%H:%M:%S").to_string() }))
}

/// Register every built-in tool.
pub fn register(builder: LiveRunnerBuilder) -> LiveRunnerBuilder {
    builder.tool_fn(current_time_declaration(), current_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_shape() {
        let call = FunctionCall { id: "1".into(), name: "get_current_time".into(), args: json!({}) };
        let result = current_time(&call).unwrap();
        let time = result["time"].as_str().unwrap();
        assert_eq!(time.len(), 8);
        assert_eq!(time.matches(':').count(), 2);
    }
}
