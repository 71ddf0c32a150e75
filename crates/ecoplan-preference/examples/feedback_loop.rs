//! Simulates a few rounds of accept/decline feedback and shows how the
//! persisted scores move.
//!
//! Run with: cargo run -p ecoplan-preference --example feedback_loop

use ecoplan_core::Feedback;
use ecoplan_preference::{JsonFileStore, PreferenceConfig, PreferenceSession};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ecoplan.preferences.json");

    let rounds = [
        vec![Feedback::accepted("bike"), Feedback::declined("led_bulbs")],
        vec![Feedback::accepted("bike"), Feedback::accepted("reduce_beef")],
        vec![Feedback::declined("public_transport"), Feedback::accepted("bike")],
    ];

    for (round, batch) in rounds.iter().enumerate() {
        // A fresh session per round, as a CLI invocation would do.
        let store = JsonFileStore::new(&path);
        let session = PreferenceSession::open(store, PreferenceConfig::default())?;
        let report = session.record_feedback(batch)?;
        println!("Round {}:", round + 1);
        for change in &report.changes {
            println!(
                "  {:<18} {:+.4} -> {:+.4}",
                change.action_id, change.before, change.after
            );
        }
    }

    println!("\nPersisted state:\n{}", std::fs::read_to_string(&path)?);
    Ok(())
}
