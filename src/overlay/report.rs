use colored::*;
use serde_json::json;

use crate::overlay::error::OverlayError;
use crate::ui::prelude::*;

#[derive(Debug)]
pub enum ItemStatus {
    Succeeded,
    /// The operation took effect but something after it failed
    Partial(Vec<String>),
    Failed(OverlayError),
}

impl ItemStatus {
    pub fn from_result(result: Result<Vec<String>, OverlayError>) -> Self {
        match result {
            Ok(warnings) if warnings.is_empty() => ItemStatus::Succeeded,
            Ok(warnings) => ItemStatus::Partial(warnings),
            Err(e) => ItemStatus::Failed(e),
        }
    }
}

#[derive(Debug)]
pub struct ItemReport {
    pub name: String,
    pub status: ItemStatus,
}

/// Outcome of an operation applied to several overlays.
#[derive(Debug)]
pub struct BatchReport {
    pub action: &'static str,
    pub items: Vec<ItemReport>,
    /// Processing stopped early because of SIGINT
    pub interrupted: bool,
}

impl BatchReport {
    pub fn new(action: &'static str) -> Self {
        Self {
            action,
            items: Vec::new(),
            interrupted: false,
        }
    }

    pub fn record(&mut self, name: impl Into<String>, status: ItemStatus) {
        self.items.push(ItemReport {
            name: name.into(),
            status,
        });
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Succeeded))
    }

    pub fn partial(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Partial(_)))
    }

    pub fn failed(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        !self.interrupted && self.items.iter().all(|i| matches!(i.status, ItemStatus::Succeeded))
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{}: {} succeeded, {} partially failed, {} failed",
            self.action,
            self.succeeded().count(),
            self.partial().count(),
            self.failed().count()
        )
    }

    /// Print the closing summary, naming every overlay that did not fully succeed.
    pub fn emit_summary(&self) {
        if self.items.is_empty() {
            emit(
                Level::Info,
                &format!("overlay.{}.nothing", self.action),
                &format!("{}: nothing to do", self.action),
                None,
            );
            return;
        }

        let data = json!({
            "action": self.action,
            "succeeded": self.succeeded().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            "partial": self.partial().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            "failed": self.failed().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            "interrupted": self.interrupted,
        });

        let code = format!("overlay.{}.summary", self.action);
        if self.is_success() {
            emit(Level::Success, &code, &self.summary_line(), Some(data));
            return;
        }

        let mut lines = vec![self.summary_line()];
        for item in &self.items {
            match &item.status {
                ItemStatus::Succeeded => {}
                ItemStatus::Partial(warnings) => {
                    for w in warnings {
                        lines.push(format!("  {} {}: {w}", "~".yellow(), item.name));
                    }
                }
                ItemStatus::Failed(e) => lines.push(format!("  {} {}: {e}", "✗".red(), item.name)),
            }
        }
        if self.interrupted {
            lines.push("  interrupted before all overlays were processed".to_string());
        }
        emit(Level::Error, &code, &lines.join("\n"), Some(data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_failure_or_partial_is_not_success() {
        let mut report = BatchReport::new("sync");
        report.record("a", ItemStatus::Succeeded);
        assert!(report.is_success());

        report.record("b", ItemStatus::Partial(vec!["hook failed".into()]));
        assert!(!report.is_success());

        report.record("c", ItemStatus::Failed(OverlayError::UnknownOverlay("c".into())));
        assert_eq!(
            report.summary_line(),
            "sync: 1 succeeded, 1 partially failed, 1 failed"
        );
    }

    #[test]
    fn interrupted_batch_is_not_success() {
        let mut report = BatchReport::new("delete");
        report.record("a", ItemStatus::Succeeded);
        report.interrupted = true;
        assert!(!report.is_success());
    }

    #[test]
    fn from_result_classifies_outcomes() {
        assert!(matches!(ItemStatus::from_result(Ok(vec![])), ItemStatus::Succeeded));
        assert!(matches!(
            ItemStatus::from_result(Ok(vec!["w".into()])),
            ItemStatus::Partial(_)
        ));
        assert!(matches!(
            ItemStatus::from_result(Err(OverlayError::AlreadyInstalled("x".into()))),
            ItemStatus::Failed(_)
        ));
    }
}
