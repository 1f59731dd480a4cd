//! crates/mri_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The five diagnostic stages produced by the classifier, in the model's output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassLabel {
    CognitivelyNormal,
    EarlyMci,
    Mci,
    LateMci,
    AlzheimersDisease,
}

impl ClassLabel {
    /// All labels, indexed exactly as the model's output vector.
    pub const ALL: [ClassLabel; 5] = [
        ClassLabel::CognitivelyNormal,
        ClassLabel::EarlyMci,
        ClassLabel::Mci,
        ClassLabel::LateMci,
        ClassLabel::AlzheimersDisease,
    ];

    pub fn index(self) -> usize {
        match self {
            ClassLabel::CognitivelyNormal => 0,
            ClassLabel::EarlyMci => 1,
            ClassLabel::Mci => 2,
            ClassLabel::LateMci => 3,
            ClassLabel::AlzheimersDisease => 4,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Short clinical code, e.g. `EMCI`.
    pub fn code(self) -> &'static str {
        match self {
            ClassLabel::CognitivelyNormal => "CN",
            ClassLabel::EarlyMci => "EMCI",
            ClassLabel::Mci => "MCI",
            ClassLabel::LateMci => "LMCI",
            ClassLabel::AlzheimersDisease => "AD",
        }
    }

    /// Human-readable name. This is also the form persisted in scan records.
    pub fn display_name(self) -> &'static str {
        match self {
            ClassLabel::CognitivelyNormal => "Cognitively Normal",
            ClassLabel::EarlyMci => "Early MCI",
            ClassLabel::Mci => "MCI",
            ClassLabel::LateMci => "Late MCI",
            ClassLabel::AlzheimersDisease => "Alzheimer's Disease",
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Accepts either the display name or the short code (case-insensitive).
impl FromStr for ClassLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|label| {
                label.display_name().eq_ignore_ascii_case(s) || label.code().eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| format!("'{}' is not a known diagnostic class", s))
    }
}

/// The result of one forward pass through the classifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: ClassLabel,
    /// Probability of `label`, as a percentage in `[0, 100]`.
    pub confidence: f64,
    /// Percentages for every class, indexed like `ClassLabel::ALL`. Sums to 100.
    pub distribution: [f64; 5],
}

/// A stored account as read back for login. Holds the password hash, so it
/// never leaves the core.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub email: String,
    pub name: String,
    pub password_hash: String,
}

/// Validated patient details captured on the application form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatientDetails {
    pub name: String,
    pub age: u32,
    pub place: String,
    /// Exactly ten ASCII digits.
    pub phone: String,
}

/// A persisted, append-only pairing of patient details with one classification result.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub user_email: String,
    pub patient: PatientDetails,
    pub prediction: ClassLabel,
    pub confidence: f64,
    /// JPEG bytes, base64 encoded.
    pub image_base64: Option<String>,
    pub submitted_at: DateTime<Utc>,
}
