#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Kern-Typen und Traits von ecoplan.
//!
//! Der Katalog ([`Catalog`]) beschreibt die verfügbaren Maßnahmen, ein
//! [`RecommendationPlan`] ist das Ergebnis eines Optimierungslaufs und
//! [`Feedback`] transportiert die Zustimmung oder Ablehnung des Nutzers zurück
//! in das Präferenzmodell.

pub mod catalog;
pub mod error;
pub mod feedback;
pub mod plan;

use std::collections::BTreeMap;

pub use catalog::{Action, ActionSpec, Catalog};
pub use error::{Bound, ValidationError};
pub use feedback::{Feedback, Verdict};
pub use plan::{Bounds, RecommendationPlan};

/// Flache Zuordnung `action_id -> score`, exakt so, wie sie persistiert wird.
pub type ScoreMap = BTreeMap<String, f64>;

/// Quelle für Präferenzwerte pro Maßnahme.
///
/// Ein Optimierer liest über dieses Trait, ein Lernverfahren schreibt über
/// [`Preference::update`]. Unbekannte IDs haben den Wert `0.0`.
pub trait Preference {
    /// Aktueller Wert für `action_id`, `0.0` wenn nie aktualisiert.
    fn score(&self, action_id: &str) -> f64;
    /// Verarbeitet eine Belohnung für `action_id`.
    fn update(&mut self, action_id: &str, reward: f64);
    /// Exportiert alle Werte als flache Zuordnung.
    fn snapshot(&self) -> ScoreMap;
    /// Ersetzt alle Werte durch einen zuvor exportierten Snapshot.
    fn load(&mut self, snapshot: ScoreMap);
}

/// Präferenz ohne Gedächtnis: jede Maßnahme hat den Wert `0.0`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Neutral;

impl Preference for Neutral {
    fn score(&self, _action_id: &str) -> f64 {
        0.0
    }
    fn update(&mut self, _action_id: &str, _reward: f64) {}
    fn snapshot(&self) -> ScoreMap {
        ScoreMap::new()
    }
    fn load(&mut self, _snapshot: ScoreMap) {}
}
