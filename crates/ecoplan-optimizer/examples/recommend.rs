//! Empfehlung für den eingebauten Katalog.
//!
//! Aufruf: cargo run -p ecoplan-optimizer --example recommend -- 50 5

use std::env;
use std::error::Error;

use ecoplan_core::{Bounds, Catalog};
use ecoplan_optimizer::Optimizer;

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = env::args().skip(1);
    let budget: f64 = args.next().map_or(Ok(50.0), |v| v.parse())?;
    let max_effort: f64 = args.next().map_or(Ok(5.0), |v| v.parse())?;

    let catalog = Catalog::builtin();
    let bounds = Bounds::new(budget, max_effort)?;
    let (plan, stats) = Optimizer::default().solve(&catalog, &bounds, &ecoplan_core::Neutral)?;

    println!("Budget {budget}, Aufwand {max_effort}:");
    for (id, count) in plan.recommended() {
        println!("  {id} x{count}");
    }
    println!(
        "Nutzen {:.1}, Kosten {:.2}, Aufwand {} ({} Knoten in {:?})",
        plan.total_benefit, plan.total_cost, plan.total_effort, stats.nodes, stats.elapsed
    );
    println!("{}", serde_json::to_string_pretty(&plan.to_response())?);

    Ok(())
}
