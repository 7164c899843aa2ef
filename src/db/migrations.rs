use anyhow::{bail, Context, Result};
use log::info;
use rusqlite::Connection;

/// Schema steps in order; step `n` brings `user_version` from `n` to `n + 1`.
const SCHEMA_STEPS: &[(&str, &str)] = &[("schema_v1.sql", include_str!("schemas/schema_v1.sql"))];

fn target_version() -> i32 {
    SCHEMA_STEPS.len() as i32
}

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let found: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("cannot read schema version")?;
    let target = target_version();

    if found < 0 {
        bail!("record store has an invalid schema version {found}");
    }
    if found > target {
        bail!("record store has schema v{found}, this build only knows up to v{target}");
    }
    if found == target {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (idx, (name, sql)) in SCHEMA_STEPS.iter().enumerate().skip(found as usize) {
        tx.execute_batch(sql)
            .with_context(|| format!("applying {name} failed"))?;
        info!("applied {name} (schema v{})", idx + 1);
    }
    tx.pragma_update(None, "user_version", target)?;
    tx.commit().context("cannot commit schema upgrade")
}
