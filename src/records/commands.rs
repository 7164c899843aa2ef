use std::io::Write;

use anyhow::{bail, Result};

use crate::{app::AppState, cli::RecordsCmd, db::WeightRecord};

use super::{export_json, read_json};

pub async fn run(state: &AppState, cmd: RecordsCmd) -> Result<()> {
    match cmd {
        RecordsCmd::List { json } => list_records(state, json).await,
        RecordsCmd::Update {
            id,
            weight,
            category,
        } => {
            let record = state.edit_record(&id, weight, &category).await?;
            println!("updated {}: {:.2} g, {}", record.id, record.weight, record.category);
            Ok(())
        }
        RecordsCmd::Delete { id } => {
            if state.delete_record(&id).await? {
                println!("deleted {id}");
            } else {
                println!("no record with id {id}");
            }
            Ok(())
        }
        RecordsCmd::Clear { yes } => {
            if !yes {
                bail!("refusing to delete every record without --yes");
            }
            let removed = state.db().clear_records().await?;
            println!("deleted {removed} records");
            Ok(())
        }
        RecordsCmd::Export { file } => {
            let records = state.list_records().await?;
            match file {
                Some(path) => {
                    export_json(&records, &path)?;
                    println!("exported {} records to {}", records.len(), path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&records)?),
            }
            Ok(())
        }
        RecordsCmd::Import { file } => {
            let records = read_json(&file)?;
            let total = records.len();
            let added = state.db().import_records(records).await?;
            println!(
                "imported {added} of {total} records from {}",
                file.display()
            );
            Ok(())
        }
    }
}

async fn list_records(state: &AppState, json: bool) -> Result<()> {
    let records = state.list_records().await?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&records)?)?;
        return Ok(());
    }

    if records.is_empty() {
        writeln!(out, "no records yet")?;
        return Ok(());
    }
    write_table(&mut out, &records)?;
    Ok(())
}

fn write_table(out: &mut impl Write, records: &[WeightRecord]) -> std::io::Result<()> {
    let category_width = records
        .iter()
        .map(|record| record.category.chars().count())
        .max()
        .unwrap_or(0)
        .max("category".len());

    writeln!(
        out,
        "{:<28}  {:<category_width$}  {:>10}  id",
        "date", "category", "weight (g)"
    )?;
    for record in records {
        writeln!(
            out,
            "{:<28}  {:<category_width$}  {:>10.2}  {}",
            record.date, record.category, record.weight, record.id
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_pads_to_the_longest_category() {
        let records = vec![
            WeightRecord {
                id: "a".into(),
                weight: 250.5,
                category: "Producto A".into(),
                timestamp: 2,
                date: "19/10/2026, 3:07:09 p. m.".into(),
            },
            WeightRecord {
                id: "b".into(),
                weight: 7.0,
                category: "Caja".into(),
                timestamp: 1,
                date: "19/10/2026, 3:05:00 p. m.".into(),
            },
        ];

        let mut out = Vec::new();
        write_table(&mut out, &records).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("Producto A      250.50  a"));
        assert!(lines[2].contains("Caja              7.00  b"));
    }
}
