//! Print the default audit configuration and show how validation reports
//! bad settings.
//!
//! Pass a path to also write the configuration to disk:
//! `cargo run --example audit_config -- audit.json`.

use molmia::{AuditConfig, FallbackPolicy, Result, VarianceMode};

fn main() -> Result<()> {
    let config = AuditConfig {
        ensemble_size: 128,
        fallback: FallbackPolicy::Strict,
        variance: VarianceMode::Global,
        deadline_secs: Some(3600.0),
        ..AuditConfig::default()
    };
    config.validate()?;

    let json = serde_json::to_string_pretty(&config)?;
    println!("{json}");

    if let Some(path) = std::env::args().nth(1) {
        config.to_json_file(&path)?;
        let reloaded = AuditConfig::from_json_file(&path)?;
        println!("wrote {path} (round trip ok: {})", reloaded == config);
    }

    let broken = AuditConfig {
        inclusion_probability: 1.5,
        ..config
    };
    if let Err(err) = broken.validate() {
        println!("rejected: {err}");
    }
    Ok(())
}
