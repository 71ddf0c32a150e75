#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Ganzzahlige Optimierung der Maßnahmenauswahl.
//!
//! Der [`Optimizer`] maximiert `Σ benefit·count` unter den Nebenbedingungen
//! `Σ cost·count ≤ budget` und `Σ effort·count ≤ max_effort`. Das Problem ist
//! ein kleines beschränktes ILP mit zwei Ungleichungen; gelöst wird es exakt
//! per Branch-and-Bound über die Stückzahlen.
//!
//! Bei mehreren optimalen Belegungen entscheidet die Suchreihenfolge. Nach
//! außen garantiert ist nur der optimale Zielfunktionswert.

pub mod error;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use ecoplan_core::plan::COST_EPSILON;
use ecoplan_core::{Bounds, Catalog, Neutral, Preference, RecommendationPlan};
use serde::{Deserialize, Serialize};

pub use error::{OptimizationError, Result};

/// Wie oft (in Knoten) die Uhr gegen das Zeitlimit geprüft wird.
const CLOCK_CHECK_INTERVAL: u64 = 1024;
/// Verbesserungen unterhalb dieser Schwelle gelten als Gleichstand.
const OBJECTIVE_EPSILON: f64 = 1e-9;

/// Zielfunktion des Solvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    /// Reiner Nutzen: `benefit · count`.
    #[default]
    Benefit,
    /// Nutzen gewichtet mit der Präferenz: `benefit · max(0, 1 + score) · count`.
    Personalized,
}

/// Laufzeitgrenzen und Zielfunktion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    pub time_limit: Duration,
    pub node_limit: u64,
    #[serde(default)]
    pub objective: Objective,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(2),
            node_limit: 5_000_000,
            objective: Objective::Benefit,
        }
    }
}

/// Kennzahlen eines Lösungslaufs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStats {
    pub nodes: u64,
    pub elapsed: Duration,
}

/// Exakter Branch-and-Bound-Solver.
#[derive(Debug, Clone, Default)]
pub struct Optimizer {
    config: SolverConfig,
}

impl Optimizer {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Löst das Problem ohne Präferenzen.
    pub fn optimize(&self, catalog: &Catalog, bounds: &Bounds) -> Result<RecommendationPlan> {
        self.optimize_with(catalog, bounds, &Neutral)
    }

    /// Löst das Problem; `prefs` wirkt nur bei [`Objective::Personalized`].
    pub fn optimize_with<P: Preference + ?Sized>(
        &self,
        catalog: &Catalog,
        bounds: &Bounds,
        prefs: &P,
    ) -> Result<RecommendationPlan> {
        self.solve(catalog, bounds, prefs).map(|(plan, _)| plan)
    }

    /// Wie [`Optimizer::optimize_with`], liefert zusätzlich Suchstatistiken.
    pub fn solve<P: Preference + ?Sized>(
        &self,
        catalog: &Catalog,
        bounds: &Bounds,
        prefs: &P,
    ) -> Result<(RecommendationPlan, SolveStats)> {
        bounds.validate()?;

        let items = self.build_items(catalog, bounds, prefs)?;
        let mut search = Search::new(&items, &self.config);
        let budget = bounds.budget;
        let effort = bounds.effort_units();
        search.run(0, budget, effort, 0.0)?;

        let stats = SolveStats {
            nodes: search.nodes,
            elapsed: search.started.elapsed(),
        };

        let counts: BTreeMap<String, u32> = items
            .iter()
            .zip(search.best.iter())
            .filter(|&(_, &count)| count > 0)
            .map(|(item, &count)| (catalog.actions()[item.index].id.clone(), count))
            .collect();
        let plan = RecommendationPlan::from_counts(catalog, &counts);
        plan.check(bounds)
            .map_err(|constraint| OptimizationError::Infeasible { constraint })?;

        #[cfg(feature = "telemetry")]
        tracing::debug!(
            nodes = stats.nodes,
            elapsed_us = u64::try_from(stats.elapsed.as_micros()).unwrap_or(u64::MAX),
            objective = plan.objective(),
            candidates = items.len(),
            "optimizer finished"
        );

        Ok((plan, stats))
    }

    fn build_items<P: Preference + ?Sized>(
        &self,
        catalog: &Catalog,
        bounds: &Bounds,
        prefs: &P,
    ) -> Result<Vec<Item>> {
        let effort_cap = bounds.effort_units();
        let mut items = Vec::with_capacity(catalog.len());

        for (index, action) in catalog.iter().enumerate() {
            let coef = match self.config.objective {
                Objective::Benefit => action.benefit,
                Objective::Personalized => {
                    action.benefit * preference_weight(prefs.score(&action.id))
                }
            };
            // Ohne positiven Beitrag ist `0` immer optimal.
            if coef <= 0.0 {
                continue;
            }
            if action.cost <= 0.0 && action.effort == 0 {
                return Err(OptimizationError::Unbounded {
                    action_id: action.id.clone(),
                });
            }

            let by_budget = if action.cost > 0.0 {
                floor_units((bounds.budget + COST_EPSILON) / action.cost)
            } else {
                u64::MAX
            };
            let by_effort = if action.effort > 0 {
                effort_cap / u64::from(action.effort)
            } else {
                u64::MAX
            };
            let max_count = by_budget.min(by_effort).min(u64::from(u32::MAX));
            if max_count == 0 {
                continue;
            }

            items.push(Item {
                index,
                coef,
                cost: action.cost,
                effort: u64::from(action.effort),
                max_count,
            });
        }

        // Dichte relativ zu beiden Ressourcen; bestimmt nur die Suchreihenfolge.
        let budget_scale = bounds.budget.max(COST_EPSILON);
        #[allow(clippy::cast_precision_loss)]
        let effort_scale = effort_cap.max(1) as f64;
        items.sort_by(|a, b| {
            let da = a.density(budget_scale, effort_scale);
            let db = b.density(budget_scale, effort_scale);
            db.total_cmp(&da).then(a.index.cmp(&b.index))
        });

        Ok(items)
    }
}

/// Löst mit Standardkonfiguration; validiert die Schranken vorab.
pub fn optimize(catalog: &Catalog, budget: f64, max_effort: f64) -> Result<RecommendationPlan> {
    let bounds = Bounds::new(budget, max_effort)?;
    Optimizer::default().optimize(catalog, &bounds)
}

fn preference_weight(score: f64) -> f64 {
    if score.is_finite() {
        (1.0 + score).max(0.0)
    } else {
        1.0
    }
}

fn floor_units(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let units = value.floor().min(u64::MAX as f64) as u64;
        units
    } else {
        0
    }
}

#[derive(Debug, Clone)]
struct Item {
    /// Position im Katalog.
    index: usize,
    coef: f64,
    cost: f64,
    effort: u64,
    max_count: u64,
}

impl Item {
    #[allow(clippy::cast_precision_loss)]
    fn density(&self, budget_scale: f64, effort_scale: f64) -> f64 {
        self.coef / (self.cost / budget_scale + self.effort as f64 / effort_scale)
    }
}

/// Obere Schranken der Restdichte ab Position `i`.
#[derive(Debug, Clone, Copy)]
struct SuffixDensity {
    /// max coef/effort über Einträge mit effort > 0.
    per_effort: f64,
    /// max coef/cost über Einträge mit effort > 0; unendlich, falls einer davon kostenlos ist.
    per_cost_effortful: f64,
    /// max coef/cost über Einträge mit effort == 0.
    per_cost_effortless: f64,
}

struct Search<'a> {
    items: &'a [Item],
    suffix: Vec<SuffixDensity>,
    current: Vec<u32>,
    best: Vec<u32>,
    best_value: f64,
    nodes: u64,
    started: Instant,
    time_limit: Duration,
    node_limit: u64,
}

impl<'a> Search<'a> {
    fn new(items: &'a [Item], config: &SolverConfig) -> Self {
        let mut suffix = vec![
            SuffixDensity {
                per_effort: 0.0,
                per_cost_effortful: 0.0,
                per_cost_effortless: 0.0,
            };
            items.len() + 1
        ];
        for i in (0..items.len()).rev() {
            let item = &items[i];
            let mut acc = suffix[i + 1];
            if item.effort > 0 {
                #[allow(clippy::cast_precision_loss)]
                let per_effort = item.coef / item.effort as f64;
                acc.per_effort = acc.per_effort.max(per_effort);
                acc.per_cost_effortful = if item.cost > 0.0 {
                    acc.per_cost_effortful.max(item.coef / item.cost)
                } else {
                    f64::INFINITY
                };
            } else {
                acc.per_cost_effortless = acc.per_cost_effortless.max(item.coef / item.cost);
            }
            suffix[i] = acc;
        }

        Self {
            items,
            suffix,
            current: vec![0; items.len()],
            best: vec![0; items.len()],
            best_value: 0.0,
            nodes: 0,
            started: Instant::now(),
            time_limit: config.time_limit,
            node_limit: config.node_limit,
        }
    }

    /// Relaxierte obere Schranke für den Restwert ab Position `i`.
    fn upper_bound(&self, i: usize, budget_left: f64, effort_left: u64) -> f64 {
        let density = self.suffix[i];
        #[allow(clippy::cast_precision_loss)]
        let by_effort = density.per_effort * effort_left as f64;
        let effortful = by_effort.min(density.per_cost_effortful * budget_left);
        let effortless = density.per_cost_effortless * budget_left;
        effortful + effortless
    }

    fn tick(&mut self) -> Result<()> {
        self.nodes += 1;
        if self.nodes > self.node_limit {
            return Err(self.timeout());
        }
        if self.nodes % CLOCK_CHECK_INTERVAL == 0 && self.started.elapsed() > self.time_limit {
            return Err(self.timeout());
        }
        Ok(())
    }

    fn timeout(&self) -> OptimizationError {
        OptimizationError::Timeout {
            limit: self.time_limit,
            nodes: self.nodes,
        }
    }

    fn run(&mut self, i: usize, budget_left: f64, effort_left: u64, value: f64) -> Result<()> {
        self.tick()?;

        if value > self.best_value + OBJECTIVE_EPSILON {
            self.best_value = value;
            self.best.copy_from_slice(&self.current);
        }
        if i == self.items.len() {
            return Ok(());
        }
        let bound = value + self.upper_bound(i, budget_left, effort_left);
        if bound <= self.best_value + OBJECTIVE_EPSILON {
            return Ok(());
        }

        let item = &self.items[i];
        let mut max_count = item.max_count;
        if item.cost > 0.0 {
            max_count = max_count.min(floor_units((budget_left + COST_EPSILON) / item.cost));
        }
        if item.effort > 0 {
            max_count = max_count.min(effort_left / item.effort);
        }
        let (coef, cost, effort) = (item.coef, item.cost, item.effort);

        // Größte Stückzahl zuerst: liefert früh eine gute untere Schranke.
        for count in (0..=max_count).rev() {
            #[allow(clippy::cast_precision_loss)]
            let units = count as f64;
            // Kleinere Stückzahlen lassen höchstens die vollen Restressourcen übrig.
            let optimistic =
                value + coef * units + self.upper_bound(i + 1, budget_left, effort_left);
            if optimistic <= self.best_value + OBJECTIVE_EPSILON {
                break;
            }
            #[allow(clippy::cast_possible_truncation)]
            let slot = count as u32;
            self.current[i] = slot;
            self.run(
                i + 1,
                (budget_left - cost * units).max(0.0),
                effort_left - effort * count,
                value + coef * units,
            )?;
        }
        self.current[i] = 0;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ecoplan_core::{Action, ScoreMap};

    fn scenario_catalog() -> Catalog {
        Catalog::new(vec![
            Action::new("A", "A", 100.0, 0.0, 3),
            Action::new("B", "B", 40.0, 0.0, 2),
            Action::new("C", "C", 50.0, 20.0, 1),
            Action::new("D", "D", 80.0, 5.0, 4),
        ])
        .unwrap()
    }

    struct Fixed(ScoreMap);

    impl Preference for Fixed {
        fn score(&self, action_id: &str) -> f64 {
            self.0.get(action_id).copied().unwrap_or(0.0)
        }
        fn update(&mut self, _action_id: &str, _reward: f64) {}
        fn snapshot(&self) -> ScoreMap {
            self.0.clone()
        }
        fn load(&mut self, snapshot: ScoreMap) {
            self.0 = snapshot;
        }
    }

    #[test]
    fn scenario_reaches_true_optimum() {
        // A + 2·C: Kosten 40, Aufwand 5, Nutzen 200.
        let plan = optimize(&scenario_catalog(), 50.0, 5.0).unwrap();
        assert!((plan.objective() - 200.0).abs() < 1e-9);
        assert_eq!(plan.count("A"), 1);
        assert_eq!(plan.count("C"), 2);
        assert_eq!(plan.count("B"), 0);
        assert_eq!(plan.count("D"), 0);
        assert!(plan.total_cost <= 50.0);
        assert!(plan.total_effort <= 5);
    }

    #[test]
    fn zero_bounds_give_empty_plan() {
        let plan = optimize(&scenario_catalog(), 0.0, 0.0).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.counts.len(), 4);
        assert!(plan.objective().abs() < f64::EPSILON);
    }

    #[test]
    fn unaffordable_actions_give_empty_plan() {
        let catalog = Catalog::new(vec![
            Action::new("solar", "Solar panels", 500.0, 5000.0, 8),
            Action::new("heat_pump", "Heat pump", 400.0, 8000.0, 6),
        ])
        .unwrap();
        let plan = optimize(&catalog, 100.0, 10.0).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn negative_bounds_are_rejected_before_solving() {
        let err = optimize(&scenario_catalog(), -1.0, 5.0).unwrap_err();
        assert!(matches!(err, OptimizationError::Validation(_)));
        assert!(err.to_string().contains("budget"));

        let err = optimize(&scenario_catalog(), 10.0, -3.0).unwrap_err();
        assert!(err.to_string().contains("max_effort"));
    }

    #[test]
    fn free_effortless_action_is_unbounded() {
        let catalog = Catalog::new(vec![
            Action::new("bike", "Bike", 100.0, 0.0, 3),
            Action::new("think", "Think green", 1.0, 0.0, 0),
        ])
        .unwrap();
        let err = optimize(&catalog, 10.0, 10.0).unwrap_err();
        assert!(matches!(
            err,
            OptimizationError::Unbounded { ref action_id } if action_id == "think"
        ));
    }

    #[test]
    fn free_effortless_action_without_benefit_is_ignored() {
        let catalog = Catalog::new(vec![
            Action::new("bike", "Bike", 100.0, 0.0, 3),
            Action::new("noop", "No-op", 0.0, 0.0, 0),
        ])
        .unwrap();
        let plan = optimize(&catalog, 10.0, 6.0).unwrap();
        assert_eq!(plan.count("bike"), 2);
        assert_eq!(plan.count("noop"), 0);
    }

    #[test]
    fn fractional_effort_ceiling_is_floored() {
        let plan = optimize(&scenario_catalog(), 0.0, 5.9).unwrap();
        // Nur kostenlose Maßnahmen: A (3) + B (2) = 140.
        assert!((plan.objective() - 140.0).abs() < 1e-9);
        assert_eq!(plan.total_effort, 5);
    }

    #[test]
    fn exhausted_node_budget_reports_timeout() {
        let optimizer = Optimizer::new(SolverConfig {
            node_limit: 3,
            ..SolverConfig::default()
        });
        let bounds = Bounds::new(50.0, 5.0).unwrap();
        let err = optimizer.optimize(&scenario_catalog(), &bounds).unwrap_err();
        assert!(matches!(err, OptimizationError::Timeout { nodes, .. } if nodes > 3));
    }

    #[test]
    fn personalized_objective_shifts_selection() {
        let catalog = Catalog::builtin();
        let bounds = Bounds::new(0.0, 3.0).unwrap();

        let plain = Optimizer::default().optimize(&catalog, &bounds).unwrap();
        assert_eq!(plain.count("bike"), 1);

        // Fahrrad wurde wiederholt abgelehnt, fleischlos angenommen.
        let mut scores = ScoreMap::new();
        scores.insert("bike".to_string(), -0.45);
        scores.insert("reduce_beef".to_string(), 0.4);
        let optimizer = Optimizer::new(SolverConfig {
            objective: Objective::Personalized,
            ..SolverConfig::default()
        });
        let plan = optimizer.optimize_with(&catalog, &bounds, &Fixed(scores)).unwrap();
        assert_eq!(plan.count("bike"), 0);
        assert_eq!(plan.count("reduce_beef"), 1);
        // Der Plan berichtet weiterhin den ungewichteten Nutzen.
        assert!((plan.objective() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn personalized_objective_ignores_scores_in_benefit_mode() {
        let catalog = Catalog::builtin();
        let bounds = Bounds::new(0.0, 3.0).unwrap();
        let mut scores = ScoreMap::new();
        scores.insert("bike".to_string(), -0.49);
        let plan = Optimizer::default()
            .optimize_with(&catalog, &bounds, &Fixed(scores))
            .unwrap();
        assert_eq!(plan.count("bike"), 1);
    }

    #[test]
    fn solver_config_deserializes_with_default_objective() {
        let config: SolverConfig = serde_json::from_str(
            r#"{"time_limit": {"secs": 1, "nanos": 0}, "node_limit": 1000}"#,
        )
        .unwrap();
        assert_eq!(config.objective, Objective::Benefit);
        assert_eq!(config.time_limit, Duration::from_secs(1));
    }
}
