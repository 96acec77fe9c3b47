// src/navigate.rs

use crate::browser::{FormPage, PageError, Selection};
use std::time::Duration;
use tracing::{info, warn};

/// How long a dropdown may take to become usable or to post back.
pub const UI_TIMEOUT: Duration = Duration::from_secs(15);

/// Element ids on the bilateral trade form.
pub mod controls {
    pub const COUNTRY: &str = "ctl00_NavigationControl_DropDownList_Country";
    pub const PARTNER: &str = "ctl00_NavigationControl_DropDownList_Partner";
    pub const TRADE_TYPE: &str = "ctl00_NavigationControl_DropDownList_TradeType";
    pub const PRODUCT_LEVEL: &str = "ctl00_NavigationControl_DropDownList_ProductClusterLevel";
    pub const TIME_PERIODS: &str =
        "ctl00_PageContent_GridViewPanelControl_DropDownList_NumTimePeriod";
    pub const EXPORT_EXCEL: &str =
        "ctl00_PageContent_GridViewPanelControl_ImageButton_ExportExcel";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropdownOutcome {
    /// The control shows the requested value (it may already have).
    Selected,
    /// The browser went away; the caller should start a new session.
    ConnectionLost,
    /// Gave up after the attempt cap.
    Failed,
}

/// Select `value` in dropdown `control`, retrying UI failures up to `max_attempts`.
pub async fn select_dropdown<P: FormPage>(
    page: &mut P,
    control: &str,
    value: &str,
    max_attempts: u32,
) -> DropdownOutcome {
    select_dropdown_with_timeout(page, control, value, max_attempts, UI_TIMEOUT).await
}

pub async fn select_dropdown_with_timeout<P: FormPage>(
    page: &mut P,
    control: &str,
    value: &str,
    max_attempts: u32,
    timeout: Duration,
) -> DropdownOutcome {
    for attempt in 1..=max_attempts {
        match page.select_option(control, value, timeout).await {
            Ok(Selection::AlreadySet) => {
                info!(control, value, "already selected, skipping");
                return DropdownOutcome::Selected;
            }
            Ok(Selection::Changed) => {
                info!(control, value, "selected");
                return DropdownOutcome::Selected;
            }
            Err(e @ PageError::Connection(_)) => {
                warn!(control, value, attempt, error = %e, "connection error while selecting");
                return DropdownOutcome::ConnectionLost;
            }
            Err(e) => {
                warn!(control, value, attempt, max_attempts, error = %e, "failed to select");
            }
        }
    }
    DropdownOutcome::Failed
}
