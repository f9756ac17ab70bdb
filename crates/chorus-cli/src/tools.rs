//! Built-in tools

use async_trait::async_trait;
use chorus_agent::Tool;
use chorus_ai::ToolExecutionResult;
use chrono::{FixedOffset, Local, Utc};
use serde_json::json;

/// Reports the current date and time
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "get_date_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time. Returns local time unless a UTC offset is given."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "utc_offset_minutes": {
                    "type": "integer",
                    "minimum": -720,
                    "maximum": 840,
                    "description": "Offset from UTC in minutes, e.g. 120 for UTC+2"
                }
            }
        })
    }

    async fn execute(&self, parameters: serde_json::Value) -> ToolExecutionResult {
        let now = Utc::now();
        let text = match parameters.get("utc_offset_minutes").and_then(|v| v.as_i64()) {
            Some(minutes) => match i32::try_from(minutes * 60)
                .ok()
                .and_then(FixedOffset::east_opt)
            {
                Some(offset) => now.with_timezone(&offset).to_rfc3339(),
                None => {
                    return ToolExecutionResult::error(format!("Invalid UTC offset: {}", minutes));
                }
            },
            None => now.with_timezone(&Local).to_rfc3339(),
        };

        ToolExecutionResult::success(text).with_details(json!({ "utc": now.to_rfc3339() }))
    }
}
