//! Rückmeldungen des Nutzers zu empfohlenen Maßnahmen.
//!
//! Die Präsentationsschicht liefert pro empfohlener Maßnahme ein einfaches
//! "angenommen / abgelehnt". Die Umrechnung in eine numerische Belohnung ist
//! Sache des Präferenzmodells.

use serde::{Deserialize, Serialize};

/// Ergebnis einer einzelnen Rückfrage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accepted,
    Declined,
}

impl From<bool> for Verdict {
    fn from(accepted: bool) -> Self {
        if accepted {
            Verdict::Accepted
        } else {
            Verdict::Declined
        }
    }
}

/// Eine beobachtete Rückmeldung für genau eine Maßnahme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub action_id: String,
    pub verdict: Verdict,
}

impl Feedback {
    pub fn new(action_id: impl Into<String>, accepted: bool) -> Self {
        Self {
            action_id: action_id.into(),
            verdict: Verdict::from(accepted),
        }
    }

    pub fn accepted(action_id: impl Into<String>) -> Self {
        Self::new(action_id, true)
    }

    pub fn declined(action_id: impl Into<String>) -> Self {
        Self::new(action_id, false)
    }

    pub fn is_accepted(&self) -> bool {
        self.verdict == Verdict::Accepted
    }
}
