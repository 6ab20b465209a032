mod extract;
mod service;

use crate::db::VerificationState;

pub use extract::{TesseractExtractor, TextExtractor};
pub use service::{VerificationOutcome, Verifier};

/// Words that mark a document as proof of bike ownership.
pub const OWNERSHIP_KEYWORDS: &[&str] = &["RECEIPT", "REGISTRATION", "INSURANCE"];

/// Words that mark a document as a driving license.
pub const LICENSE_KEYWORDS: &[&str] = &["LICENSE", "LICENCE", "DRIVING", "DRIVER"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Verified,
    Pending,
}

impl From<Decision> for VerificationState {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Verified => VerificationState::Verified,
            Decision::Pending => VerificationState::Pending,
        }
    }
}

/// Decides whether a document's text names `target`.
///
/// The full name anywhere in the text verifies. Failing that, the first
/// token of the name together with one of `keywords` also verifies.
/// Anything else stays pending for manual review; this never rejects.
pub fn decide(extracted: &str, target: &str, keywords: &[&str]) -> Decision {
    let text = extracted.to_uppercase();
    let target = target.trim().to_uppercase();
    if target.is_empty() {
        return Decision::Pending;
    }

    if text.contains(&target) {
        return Decision::Verified;
    }

    let first_token = target.split_whitespace().next().unwrap_or_default();
    let has_context = keywords
        .iter()
        .any(|keyword| text.contains(&keyword.to_uppercase()));

    if text.contains(first_token) && has_context {
        Decision::Verified
    } else {
        Decision::Pending
    }
}
