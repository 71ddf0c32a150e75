//! Anfrage- und Ergebnistypen eines Optimierungslaufs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::error::{Bound, ValidationError};

/// Toleranz für Gleitkommavergleiche gegen das Budget.
pub const COST_EPSILON: f64 = 1e-9;

/// Die beiden Schranken einer Anfrage: `{budget, max_effort}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub budget: f64,
    pub max_effort: f64,
}

impl Bounds {
    /// Validiert beide Schranken (endlich und nicht negativ).
    pub fn new(budget: f64, max_effort: f64) -> Result<Self, ValidationError> {
        let bounds = Self { budget, max_effort };
        bounds.validate()?;
        Ok(bounds)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (bound, value) in [(Bound::Budget, self.budget), (Bound::Effort, self.max_effort)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidBound { bound, value });
            }
        }
        Ok(())
    }

    /// Aufwand ist ganzzahlig, daher zählt nur der ganzzahlige Anteil.
    pub fn effort_units(&self) -> u64 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let units = self.max_effort.floor().min(u64::MAX as f64) as u64;
        units
    }
}

/// Empfohlene Stückzahl pro Maßnahme samt Summen.
///
/// Enthält einen Eintrag für jede Maßnahme des Katalogs, auch mit `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationPlan {
    pub counts: BTreeMap<String, u32>,
    pub total_benefit: f64,
    pub total_cost: f64,
    pub total_effort: u64,
}

impl RecommendationPlan {
    /// Baut einen Plan und berechnet die Summen gegen `catalog`.
    ///
    /// IDs, die nicht im Katalog stehen, werden ignoriert.
    pub fn from_counts(catalog: &Catalog, counts: &BTreeMap<String, u32>) -> Self {
        let mut plan = Self {
            counts: BTreeMap::new(),
            total_benefit: 0.0,
            total_cost: 0.0,
            total_effort: 0,
        };
        for action in catalog.iter() {
            let count = counts.get(&action.id).copied().unwrap_or(0);
            plan.total_benefit += action.benefit * f64::from(count);
            plan.total_cost += action.cost * f64::from(count);
            plan.total_effort += u64::from(action.effort) * u64::from(count);
            plan.counts.insert(action.id.clone(), count);
        }
        plan
    }

    /// Ein Plan, der nichts empfiehlt.
    pub fn empty(catalog: &Catalog) -> Self {
        Self::from_counts(catalog, &BTreeMap::new())
    }

    /// Zielfunktionswert: der gesamte Nutzen.
    pub fn objective(&self) -> f64 {
        self.total_benefit
    }

    pub fn count(&self, action_id: &str) -> u32 {
        self.counts.get(action_id).copied().unwrap_or(0)
    }

    /// Nur Maßnahmen mit `count > 0`.
    pub fn recommended(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts
            .iter()
            .filter(|&(_, &c)| c > 0)
            .map(|(id, &c)| (id.as_str(), c))
    }

    pub fn is_empty(&self) -> bool {
        self.recommended().next().is_none()
    }

    /// Antwortformat für die Präsentationsschicht: `{action_id: count}` ohne Nullen.
    pub fn to_response(&self) -> BTreeMap<String, u32> {
        self.recommended()
            .map(|(id, c)| (id.to_string(), c))
            .collect()
    }

    /// Prüft beide Nebenbedingungen und nennt die verletzte.
    pub fn check(&self, bounds: &Bounds) -> Result<(), Bound> {
        if self.total_cost > bounds.budget + COST_EPSILON {
            return Err(Bound::Budget);
        }
        if self.total_effort > bounds.effort_units() {
            return Err(Bound::Effort);
        }
        Ok(())
    }
}
