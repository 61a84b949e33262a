//! Time window evaluation for the application and payment periods.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::repository::RepositoryError;
use super::settings::{
    SettingsSnapshot, APPLICATION_DEADLINE, APPLICATION_START_DATE, PAYMENT_DEADLINE,
    PAYMENT_START_DATE, REGISTRATION_OPEN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    NotStarted,
    Open,
    Closed,
}

impl WindowStatus {
    pub const fn label(self) -> &'static str {
        match self {
            WindowStatus::NotStarted => "not_started",
            WindowStatus::Open => "open",
            WindowStatus::Closed => "closed",
        }
    }
}

/// Decide the state of a window. First matching rule wins:
/// an explicit `false` override, a missing start, a future start, a passed deadline.
pub fn evaluate_window(
    now: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    deadline: Option<DateTime<Utc>>,
    open_override: Option<bool>,
) -> WindowStatus {
    if open_override == Some(false) {
        return WindowStatus::NotStarted;
    }

    let Some(start) = start else {
        return WindowStatus::NotStarted;
    };

    if now < start {
        return WindowStatus::NotStarted;
    }

    match deadline {
        Some(deadline) if now > deadline => WindowStatus::Closed,
        _ => WindowStatus::Open,
    }
}

/// Which admission period a report describes; only affects wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Application,
    Payment,
}

impl WindowKind {
    fn subject(self) -> &'static str {
        match self {
            WindowKind::Application => "Applications",
            WindowKind::Payment => "Payment period",
        }
    }

    fn noun(self) -> &'static str {
        match self {
            WindowKind::Application => "application",
            WindowKind::Payment => "payment",
        }
    }

    fn plural(self) -> bool {
        matches!(self, WindowKind::Application)
    }
}

/// Window state plus the dates and wording shown to students.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowReport {
    pub status: WindowStatus,
    pub is_open: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub message: String,
}

impl WindowReport {
    pub fn evaluate(
        kind: WindowKind,
        now: DateTime<Utc>,
        start: Option<DateTime<Utc>>,
        deadline: Option<DateTime<Utc>>,
        open_override: Option<bool>,
    ) -> Self {
        let status = evaluate_window(now, start, deadline, open_override);
        Self {
            status,
            is_open: status == WindowStatus::Open,
            start_date: start,
            deadline,
            message: status_message(kind, status, start, deadline),
        }
    }

    /// Report used when the settings store cannot be read.
    pub fn unavailable(kind: WindowKind) -> Self {
        Self {
            status: WindowStatus::Closed,
            is_open: false,
            start_date: None,
            deadline: None,
            message: format!(
                "Unable to verify {} status. Please contact administration.",
                kind.noun()
            ),
        }
    }
}

fn display_instant(instant: DateTime<Utc>) -> String {
    instant.format("%B %-d, %Y at %I:%M %p UTC").to_string()
}

fn status_message(
    kind: WindowKind,
    status: WindowStatus,
    start: Option<DateTime<Utc>>,
    deadline: Option<DateTime<Utc>>,
) -> String {
    let subject = kind.subject();
    let (have, close, is) = if kind.plural() {
        ("have", "close", "are")
    } else {
        ("has", "closes", "is")
    };

    match (status, start, deadline) {
        (WindowStatus::NotStarted, Some(start), _) => {
            format!("{subject} will open on {}.", display_instant(start))
        }
        (WindowStatus::NotStarted, None, _) => {
            format!("{subject} {have} not started yet. Please check back later.")
        }
        (WindowStatus::Closed, _, Some(deadline)) => {
            format!("{subject} closed on {}.", display_instant(deadline))
        }
        (WindowStatus::Closed, _, None) => format!("{subject} {is} currently closed."),
        (WindowStatus::Open, _, Some(deadline)) => {
            format!("{subject} {close} on {}.", display_instant(deadline))
        }
        (WindowStatus::Open, _, None) => format!("{subject} {is} currently open."),
    }
}

/// Application window: start, deadline, and the registration override.
pub fn application_window(settings: &SettingsSnapshot, now: DateTime<Utc>) -> WindowReport {
    WindowReport::evaluate(
        WindowKind::Application,
        now,
        settings.date(APPLICATION_START_DATE),
        settings.date(APPLICATION_DEADLINE),
        settings.flag(REGISTRATION_OPEN),
    )
}

/// Payment window: start and deadline only.
pub fn payment_window(settings: &SettingsSnapshot, now: DateTime<Utc>) -> WindowReport {
    WindowReport::evaluate(
        WindowKind::Payment,
        now,
        settings.date(PAYMENT_START_DATE),
        settings.date(PAYMENT_DEADLINE),
        None,
    )
}

/// Evaluate a window from a fallible settings read, closing it when the read failed.
pub fn window_from_store(
    kind: WindowKind,
    settings: Result<SettingsSnapshot, RepositoryError>,
    now: DateTime<Utc>,
) -> WindowReport {
    match settings {
        Ok(settings) => match kind {
            WindowKind::Application => application_window(&settings, now),
            WindowKind::Payment => payment_window(&settings, now),
        },
        Err(err) => {
            tracing::error!(error = %err, window = kind.noun(), "settings unavailable; window reported closed");
            WindowReport::unavailable(kind)
        }
    }
}
