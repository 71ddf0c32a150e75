//! Der statische Katalog der Maßnahmen.
//!
//! Ein [`Catalog`] wird einmal beim Start geladen, validiert und danach nur
//! noch gelesen. Das Eingabeformat der Host-Anwendung ist eine Zuordnung
//! `id -> {name, benefit, cost, effort}`, siehe [`ActionSpec`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;

use crate::error::ValidationError;

/// Unveränderlicher Katalogeintrag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    /// Eindeutiger Schlüssel, z. B. `"bike"`.
    pub id: String,
    /// Menschenlesbare Bezeichnung.
    pub name: String,
    /// Nutzen pro Einheit (z. B. vermiedene kg CO₂).
    pub benefit: f64,
    /// Kosten pro Einheit.
    pub cost: f64,
    /// Aufwandseinheiten pro Einheit.
    pub effort: u32,
}

impl Action {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        benefit: f64,
        cost: f64,
        effort: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            benefit,
            cost,
            effort,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyId);
        }
        check_magnitude(&self.id, "benefit", self.benefit)?;
        check_magnitude(&self.id, "cost", self.cost)?;
        Ok(())
    }
}

/// Rohform eines Eintrags, wie ihn die Host-Anwendung liefert.
///
/// `effort` ist hier bewusst ein `f64`, damit negative oder gebrochene Werte
/// als [`ValidationError`] statt als Parserfehler gemeldet werden.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionSpec {
    pub name: String,
    pub benefit: f64,
    pub cost: f64,
    pub effort: f64,
}

/// Validierter, unveränderlicher Katalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    actions: Vec<Action>,
}

impl Catalog {
    /// Baut einen Katalog aus einzelnen Einträgen; die Reihenfolge bleibt erhalten.
    ///
    /// Kataloge aus [`Catalog::from_specs`] sind dagegen nach ID sortiert.
    pub fn new(actions: Vec<Action>) -> Result<Self, ValidationError> {
        if actions.is_empty() {
            return Err(ValidationError::EmptyCatalog);
        }
        let mut seen = HashSet::with_capacity(actions.len());
        for action in &actions {
            action.validate()?;
            if !seen.insert(action.id.as_str()) {
                return Err(ValidationError::DuplicateId(action.id.clone()));
            }
        }
        Ok(Self { actions })
    }

    /// Baut einen Katalog aus dem Eingabeformat `id -> ActionSpec`.
    pub fn from_specs(specs: BTreeMap<String, ActionSpec>) -> Result<Self, ValidationError> {
        let actions = specs
            .into_iter()
            .map(|(id, spec)| {
                let effort = effort_units(&id, spec.effort)?;
                Ok(Action {
                    id,
                    name: spec.name,
                    benefit: spec.benefit,
                    cost: spec.cost,
                    effort,
                })
            })
            .collect::<Result<Vec<_>, ValidationError>>()?;
        Self::new(actions)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let specs: BTreeMap<String, ActionSpec> = serde_json::from_str(json)?;
        Self::from_specs(specs)
    }

    pub fn from_json_reader(reader: impl Read) -> Result<Self, ValidationError> {
        let specs: BTreeMap<String, ActionSpec> = serde_json::from_reader(reader)?;
        Self::from_specs(specs)
    }

    /// Referenzkatalog mit vier alltäglichen Maßnahmen.
    pub fn builtin() -> Self {
        Self {
            actions: vec![
                Action::new("bike", "Bike instead of drive", 100.0, 0.0, 3),
                Action::new("reduce_beef", "Replace beef with plant-based", 40.0, 0.0, 2),
                Action::new("led_bulbs", "Switch to LED bulbs", 50.0, 20.0, 1),
                Action::new("public_transport", "Use public transport", 80.0, 5.0, 4),
            ],
        }
    }

    /// Exportiert den Katalog wieder im Eingabeformat.
    pub fn to_specs(&self) -> BTreeMap<String, ActionSpec> {
        self.actions
            .iter()
            .map(|a| {
                (
                    a.id.clone(),
                    ActionSpec {
                        name: a.name.clone(),
                        benefit: a.benefit,
                        cost: a.cost,
                        effort: f64::from(a.effort),
                    },
                )
            })
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Immer `false` für einen validierten Katalog.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

fn check_magnitude(
    action_id: &str,
    field: &'static str,
    value: f64,
) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidField {
            action_id: action_id.to_string(),
            field,
            expected: "number",
            value,
        })
    }
}

fn effort_units(action_id: &str, value: f64) -> Result<u32, ValidationError> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= f64::from(u32::MAX) {
        // Ganzzahligkeit und Wertebereich sind oben geprüft.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let units = value as u32;
        Ok(units)
    } else {
        Err(ValidationError::InvalidField {
            action_id: action_id.to_string(),
            field: "effort",
            expected: "integer",
            value,
        })
    }
}
