//! Account control tags.
//!
//! Control tags are account-level switches that suppress parts of the billing
//! pipeline. They matter to the completion layer because a suppressed stage
//! never emits the event a caller would otherwise wait for.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A single control tag as stored on an account.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlTag {
    /// No automatic payment attempt after an invoice is generated.
    AutoPayOff,
    /// No invoice generation at all.
    AutoInvoicingOff,
    /// Invoices are generated as drafts and never committed automatically.
    AutoInvoicingDraft,
}

impl ControlTag {
    pub const ALL: [ControlTag; 3] = [
        ControlTag::AutoPayOff,
        ControlTag::AutoInvoicingOff,
        ControlTag::AutoInvoicingDraft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlTag::AutoPayOff => "AUTO_PAY_OFF",
            ControlTag::AutoInvoicingOff => "AUTO_INVOICING_OFF",
            ControlTag::AutoInvoicingDraft => "AUTO_INVOICING_DRAFT",
        }
    }
}

impl core::fmt::Display for ControlTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlTag {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ControlTag::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::validation(format!("unknown control tag: {s}")))
    }
}

/// Immutable snapshot of an account's control tags.
///
/// Captured once per command, before the command runs; later tag changes do
/// not affect a command already in flight.
///
/// Serialized as the list of tags present, e.g. `["AUTO_PAY_OFF"]`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<ControlTag>", from = "Vec<ControlTag>")]
pub struct ControlTagSet {
    auto_invoicing_off: bool,
    auto_invoicing_draft: bool,
    auto_pay_off: bool,
}

impl ControlTagSet {
    pub const fn empty() -> Self {
        Self {
            auto_invoicing_off: false,
            auto_invoicing_draft: false,
            auto_pay_off: false,
        }
    }

    pub const fn with(mut self, tag: ControlTag) -> Self {
        match tag {
            ControlTag::AutoPayOff => self.auto_pay_off = true,
            ControlTag::AutoInvoicingOff => self.auto_invoicing_off = true,
            ControlTag::AutoInvoicingDraft => self.auto_invoicing_draft = true,
        }
        self
    }

    pub const fn contains(&self, tag: ControlTag) -> bool {
        match tag {
            ControlTag::AutoPayOff => self.auto_pay_off,
            ControlTag::AutoInvoicingOff => self.auto_invoicing_off,
            ControlTag::AutoInvoicingDraft => self.auto_invoicing_draft,
        }
    }

    pub const fn auto_invoicing_off(&self) -> bool {
        self.auto_invoicing_off
    }

    pub const fn auto_invoicing_draft(&self) -> bool {
        self.auto_invoicing_draft
    }

    pub const fn auto_pay_off(&self) -> bool {
        self.auto_pay_off
    }

    /// Invoices are either not generated or not committed automatically.
    pub const fn invoicing_suppressed(&self) -> bool {
        self.auto_invoicing_off || self.auto_invoicing_draft
    }

    /// Tags present in this set, in a stable order.
    pub fn tags(&self) -> Vec<ControlTag> {
        ControlTag::ALL
            .into_iter()
            .filter(|t| self.contains(*t))
            .collect()
    }
}

impl FromIterator<ControlTag> for ControlTagSet {
    fn from_iter<I: IntoIterator<Item = ControlTag>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl From<ControlTagSet> for Vec<ControlTag> {
    fn from(set: ControlTagSet) -> Self {
        set.tags()
    }
}

impl From<Vec<ControlTag>> for ControlTagSet {
    fn from(tags: Vec<ControlTag>) -> Self {
        tags.into_iter().collect()
    }
}
