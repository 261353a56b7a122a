//! CLI command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;
use vmstore::{Component, ObjectStore, SledEngine, StoreConfig};

pub type Store = ObjectStore<SledEngine>;

/// Config file if given, else environment; `--db` wins over both.
pub fn load_config(path: Option<&Path>, db: Option<PathBuf>) -> Result<StoreConfig> {
    let mut config = match path {
        Some(path) => StoreConfig::from_file(path)?,
        None => StoreConfig::from_env()?,
    };
    if let Some(db) = db {
        config.db_path = db;
    }
    Ok(config)
}

pub fn open_store(config: &StoreConfig, writable: bool) -> Result<Store> {
    let engine = SledEngine::from_config(config)
        .with_context(|| format!("failed to open database at {}", config.db_path.display()))?;
    if writable && !config.read_only {
        Ok(ObjectStore::new(engine))
    } else {
        Ok(ObjectStore::read_only(engine))
    }
}

pub fn list(store: &Store) -> Result<()> {
    for name in store.list_checkpoints()? {
        println!("{}", name);
    }
    Ok(())
}

#[derive(Serialize)]
struct ComponentView {
    component: &'static str,
    hash: String,
    reference_count: Option<u32>,
}

#[derive(Serialize)]
struct CheckpointView {
    name: String,
    status: u8,
    block_reason_bytes: usize,
    balance_tracker_bytes: usize,
    components: Vec<ComponentView>,
}

/// Counts shown are current, not as of bind time.
pub fn show(store: &Store, name: &str, json: bool) -> Result<()> {
    let record = store.get_checkpoint_record(name)?;
    let components = Component::ALL
        .into_iter()
        .map(|component| -> Result<ComponentView> {
            let hash = record.roots.component(component).hash;
            Ok(ComponentView {
                component: component.name(),
                hash: hash.to_hex(),
                reference_count: store.reference_count(&hash)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let view = CheckpointView {
        name: name.to_string(),
        status: record.roots.status,
        block_reason_bytes: record.roots.block_reason.len(),
        balance_tracker_bytes: record.roots.balance_tracker.len(),
        components,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("checkpoint {}", view.name);
    println!("  status:          {}", view.status);
    println!("  block reason:    {} bytes", view.block_reason_bytes);
    println!("  balance tracker: {} bytes", view.balance_tracker_bytes);
    for c in &view.components {
        let count = c
            .reference_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "MISSING".to_string());
        println!("  {:<14} {} (refs {})", c.component, c.hash, count);
    }
    Ok(())
}

pub fn delete(store: &Store, name: &str) -> Result<()> {
    let before = store.stats()?;
    if let Err(e) = store.delete_checkpoint(name) {
        if e.is_fatal() {
            eprintln!("store is inconsistent; run `vmctl verify` for details");
        }
        return Err(e).with_context(|| format!("failed to delete checkpoint {}", name));
    }
    store.flush()?;
    let after = store.stats()?;

    info!("deleted {}", name);
    println!(
        "deleted {} ({} records reclaimed)",
        name,
        before.records.saturating_sub(after.records)
    );
    Ok(())
}

pub fn stats(store: &Store, json: bool) -> Result<()> {
    let stats = store.stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!("records:          {}", stats.records);
    println!("checkpoints:      {}", stats.checkpoints);
    println!("total references: {}", stats.total_references);
    println!("bytes:            {}", stats.bytes);
    Ok(())
}

/// Returns whether the store verified clean.
pub fn verify(store: &Store, json: bool) -> Result<bool> {
    let report = store.verify()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for finding in &report.findings {
            println!("{}", finding);
        }
        println!(
            "checked {} records and {} checkpoints: {} findings",
            report.records_checked,
            report.checkpoints_checked,
            report.findings.len()
        );
    }
    Ok(report.is_clean())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_db_flag_overrides_config_file() -> Result<()> {
        let dir = TempDir::new()?;
        let file = dir.path().join("vmctl.toml");
        std::fs::write(&file, "[store]\ndb_path = \"/from/file\"\nlog_level = \"debug\"\n")?;

        let config = load_config(Some(&file), Some(dir.path().join("db")))?;
        assert_eq!(config.db_path, dir.path().join("db"));
        assert_eq!(config.log_level, "debug");
        Ok(())
    }

    #[test]
    fn test_open_store_read_only_unless_writable() -> Result<()> {
        let dir = TempDir::new()?;
        let config = StoreConfig::with_db_path(dir.path().join("db"));
        {
            let store = open_store(&config, false)?;
            assert!(store.is_read_only());
        }
        let store = open_store(&config, true)?;
        assert!(!store.is_read_only());
        assert!(verify(&store, false)?);
        Ok(())
    }
}
