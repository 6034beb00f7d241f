//! The recording options offered to the user and whether each can run.

use std::collections::HashMap;

use anyhow::{bail, Result};
use tracing::debug;

pub const HEAP_DUMP_TITLE: &str = "Capture heap dump";
pub const JAVA_KOTLIN_TITLE: &str = "Record Java / Kotlin allocations";
pub const NATIVE_TITLE: &str = "Record native allocations";

pub const X86_NATIVE_UNAVAILABLE: &str =
    "Native memory recording is unavailable on x86 or x86_64 devices";

/// What the stage does when an option starts or stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingAction {
    HeapDump,
    ToggleNative,
    ToggleJavaKotlin,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingOption {
    pub title: String,
    pub description: String,
    pub start: RecordingAction,
    /// `None` for one-shot options such as heap dumps.
    pub stop: Option<RecordingAction>,
}

impl RecordingOption {
    pub fn heap_dump() -> Self {
        Self {
            title: HEAP_DUMP_TITLE.to_string(),
            description: "View objects in your app that are using memory at a specific point in time"
                .to_string(),
            start: RecordingAction::HeapDump,
            stop: None,
        }
    }

    pub fn native_allocations() -> Self {
        Self {
            title: NATIVE_TITLE.to_string(),
            description: "View how each C/C++ object was allocated over a period of time".to_string(),
            start: RecordingAction::ToggleNative,
            stop: Some(RecordingAction::ToggleNative),
        }
    }

    pub fn java_kotlin_allocations() -> Self {
        Self {
            title: JAVA_KOTLIN_TITLE.to_string(),
            description: "View how each Java / Kotlin object was allocated over a period of time"
                .to_string(),
            start: RecordingAction::ToggleJavaKotlin,
            stop: Some(RecordingAction::ToggleJavaKotlin),
        }
    }
}

/// Reason shown when a feature is not available for profileable processes.
pub fn profileable_unsupported(feature_title: &str) -> String {
    format!("{feature_title} is not supported for profileable processes")
}

#[derive(Debug, Default)]
pub struct RecordingOptionsModel {
    built_in: Vec<RecordingOption>,
    not_ready: HashMap<String, String>,
    selected: Option<usize>,
    recording: bool,
    last_error: Option<String>,
}

impl RecordingOptionsModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_built_in_option(&mut self, option: RecordingOption) {
        self.built_in.push(option);
    }

    pub fn built_in_options(&self) -> &[RecordingOption] {
        &self.built_in
    }

    /// Marks `title` unavailable with `reason`, or available again with `None`.
    pub fn set_option_not_ready(&mut self, title: &str, reason: Option<String>) {
        match reason {
            Some(reason) => {
                debug!("Option '{}' not ready: {}", title, reason);
                self.not_ready.insert(title.to_string(), reason);
            }
            None => {
                self.not_ready.remove(title);
            }
        }
    }

    pub fn not_ready_reason(&self, title: &str) -> Option<&str> {
        self.not_ready.get(title).map(String::as_str)
    }

    pub fn select_built_in_option(&mut self, title: &str) -> Result<()> {
        let Some(index) = self.built_in.iter().position(|o| o.title == title) else {
            bail!("no recording option named '{}'", title);
        };
        self.selected = Some(index);
        Ok(())
    }

    pub fn selected_option(&self) -> Option<&RecordingOption> {
        self.selected.and_then(|i| self.built_in.get(i))
    }

    /// The action to run for starting the selected option, if it can start.
    pub fn start(&mut self) -> Option<RecordingAction> {
        if self.recording {
            return None;
        }
        let option = self.selected_option()?;
        if self.not_ready.contains_key(&option.title) {
            return None;
        }
        let action = option.start;
        self.last_error = None;
        Some(action)
    }

    /// The action to run for stopping the selected option while recording.
    pub fn stop(&mut self) -> Option<RecordingAction> {
        if !self.recording {
            return None;
        }
        self.selected_option()?.stop
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn set_recording(&mut self) {
        self.recording = true;
    }

    pub fn set_finished(&mut self) {
        self.recording = false;
    }

    /// Records a failure message and leaves the recording state.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.recording = false;
        self.last_error = Some(message.into());
    }

    /// Records a failed stop. The recording keeps running.
    pub fn set_stop_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> RecordingOptionsModel {
        let mut model = RecordingOptionsModel::new();
        model.add_built_in_option(RecordingOption::heap_dump());
        model.add_built_in_option(RecordingOption::native_allocations());
        model
    }

    #[test]
    fn test_start_and_stop_selected() {
        let mut model = model();
        assert_eq!(model.start(), None);
        model.select_built_in_option(NATIVE_TITLE).unwrap();
        assert_eq!(model.start(), Some(RecordingAction::ToggleNative));
        assert_eq!(model.stop(), None);
        model.set_recording();
        assert_eq!(model.start(), None);
        assert_eq!(model.stop(), Some(RecordingAction::ToggleNative));
        model.set_finished();
        assert!(!model.is_recording());
    }

    #[test]
    fn test_not_ready_blocks_start() {
        let mut model = model();
        model.select_built_in_option(NATIVE_TITLE).unwrap();
        model.set_option_not_ready(NATIVE_TITLE, Some(X86_NATIVE_UNAVAILABLE.to_string()));
        assert_eq!(model.not_ready_reason(NATIVE_TITLE), Some(X86_NATIVE_UNAVAILABLE));
        assert_eq!(model.start(), None);
        model.set_option_not_ready(NATIVE_TITLE, None);
        assert!(model.start().is_some());
    }

    #[test]
    fn test_error_and_unknown_option() {
        let mut model = model();
        assert!(model.select_built_in_option("nope").is_err());
        model.select_built_in_option(HEAP_DUMP_TITLE).unwrap();
        model.set_recording();
        model.set_error("dump failed");
        assert!(!model.is_recording());
        assert_eq!(model.last_error(), Some("dump failed"));
        assert_eq!(model.start(), Some(RecordingAction::HeapDump));
        assert_eq!(model.last_error(), None);
        assert_eq!(
            profileable_unsupported("Heap dump"),
            "Heap dump is not supported for profileable processes"
        );
    }
}
