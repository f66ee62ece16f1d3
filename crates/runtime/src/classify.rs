//! Classification of streamed output fragments.
//!
//! While streaming, the backend reports every raw fragment it receives. Some
//! of those fragments carry tool-call payloads rather than text meant for the
//! user; a [`FragmentClassifier`] decides which is which.

use serde_json::Value;

/// What to do with one streamed fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the fragment to the caller.
    Emit,
    /// Keep the fragment out of the visible stream.
    Suppress,
}

/// Decides whether a streamed fragment is user-visible text.
pub trait FragmentClassifier: Send + Sync {
    fn classify(&self, fragment: &str) -> Verdict;
}

/// Suppresses the tool-call deltas of OpenAI-style streams.
///
/// A fragment is treated as tool-call data when it is a non-empty JSON array,
/// or a JSON object whose `choices[0].tool_calls` is a non-empty array.
/// A fragment mixing text and tool-call data is dropped whole.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolDeltaClassifier;

impl FragmentClassifier for ToolDeltaClassifier {
    fn classify(&self, fragment: &str) -> Verdict {
        let Ok(value) = serde_json::from_str::<Value>(fragment) else {
            return Verdict::Emit;
        };

        let is_tool_delta = match &value {
            Value::Array(items) => !items.is_empty(),
            Value::Object(_) => value
                .pointer("/choices/0/tool_calls")
                .and_then(Value::as_array)
                .is_some_and(|calls| !calls.is_empty()),
            _ => false,
        };

        if is_tool_delta {
            Verdict::Suppress
        } else {
            Verdict::Emit
        }
    }
}
