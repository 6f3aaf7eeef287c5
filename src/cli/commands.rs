use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use code_impact::advisory::RuleBasedProvider;
use code_impact::indexer::{FileEvent, FileWalker, FileWatcher, IgnoreRules};
use code_impact::{Engine, EngineConfig, REGISTRY};

use super::{Cli, Commands};

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("Project root {} not found", cli.root.display()))?;
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::discover(&root)?,
    };
    let mut engine = Engine::open_with_config(&root, config)?;

    match cli.command {
        Commands::Health => print_json(&engine.health()?)?,
        Commands::Scan => {
            let spinner = spinner("Indexing files...")?;
            let count = engine.scan()?;
            spinner.finish_with_message(format!("Indexed {} files", count));
        }
        Commands::Snapshot => {
            let spinner = spinner("Creating snapshot...")?;
            let snapshot = engine.create_snapshot()?;
            spinner.finish_with_message(format!(
                "Snapshot {}: {} files, {} dependency edges",
                snapshot.id,
                snapshot.files.len(),
                snapshot.graph.edge_count()
            ));
        }
        Commands::Analyze { files } => print_json(&engine.analyze(&files)?)?,
        Commands::Impact { file, dfs } => {
            print_json(&engine.impact(&[file], dfs))?;
        }
        Commands::Graph {
            cycles,
            sccs,
            clusters,
        } => {
            if cycles {
                print_json(&engine.cycles())?;
            } else if sccs {
                print_json(&engine.strongly_connected_components())?;
            } else if clusters {
                print_json(&engine.clusters())?;
            } else {
                print_json(&engine.dependency_graph())?;
            }
        }
        Commands::Breaking { advise } => {
            let reports = engine.breaking_changes()?;
            if advise {
                print_json(&engine.annotate(&RuleBasedProvider, &reports))?;
            } else {
                print_json(&reports)?;
            }
        }
        Commands::Compare { from, to } => print_json(&engine.compare(&from, &to)?)?,
        Commands::History { offset, limit, tag } => {
            print_json(&engine.history(offset, limit, tag.as_deref())?)?;
        }
        Commands::Show { id } => print_json(&engine.snapshot(&id)?)?,
        Commands::Trend => print_json(&engine.trend()?)?,
        Commands::Tag {
            id,
            tags,
            description,
        } => print_json(&engine.tag(&id, &tags, description)?)?,
        Commands::Export { id, dest } => {
            engine.export_snapshot(&id, &dest)?;
            println!("Exported {} to {}", id, dest.display());
        }
        Commands::Import { src } => {
            let id = engine.import_snapshot(&src)?;
            println!("Imported snapshot {}", id);
        }
        Commands::Maintain => print_json(&engine.maintain()?)?,
        Commands::Restore { id } => print_json(&engine.restore_preview(&id)?)?,
        Commands::Advisories { file } => print_json(&engine.advisories(file.as_deref()))?,
        Commands::Callers { symbol } => print_json(&engine.find_callers(&symbol)?)?,
        Commands::Callees { symbol } => print_json(&engine.find_callees(&symbol)?)?,
        Commands::Paths { from, to, max_depth } => {
            print_json(&engine.find_all_paths(&from, &to, max_depth)?)?;
        }
        Commands::Changed { base, analyze } => {
            let changes = engine.vcs_changes(base.as_deref())?;
            if analyze {
                let paths: Vec<PathBuf> = changes.iter().map(|c| PathBuf::from(&c.path)).collect();
                print_json(&engine.analyze(&paths)?)?;
            } else {
                print_json(&changes)?;
            }
        }
        Commands::Diff { file, base } => print!("{}", engine.vcs_diff(&file, base.as_deref())?),
        Commands::Watch { debounce_ms } => watch(&mut engine, &root, Duration::from_millis(debounce_ms))?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn spinner(message: &'static str) -> anyhow::Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

/// Feeds debounced batches into the engine one at a time
fn watch(engine: &mut Engine, root: &Path, debounce: Duration) -> anyhow::Result<()> {
    let rules = IgnoreRules::new(&engine.config().ignore_dirs).with_gitignore(root);
    let walker = FileWalker::with_rules(REGISTRY.clone(), rules);
    let watcher = FileWatcher::new(root, walker, debounce)?;

    if engine.health()?.snapshot_count == 0 {
        let snapshot = engine.create_snapshot()?;
        println!("Baseline snapshot {}", snapshot.id);
    }
    println!("Watching {} for changes...", root.display());

    while let Some(events) = watcher.recv() {
        let paths: Vec<PathBuf> = events.iter().map(|e| e.path().to_path_buf()).collect();
        for event in &events {
            match event {
                FileEvent::Modified(path) => tracing::debug!("Modified {}", path.display()),
                FileEvent::Deleted(path) => tracing::debug!("Deleted {}", path.display()),
            }
        }

        match engine.analyze(&paths) {
            Ok(result) if result.outcome.created => {
                let breaking = result.reports.iter().filter(|r| r.is_breaking()).count();
                println!(
                    "Snapshot {}: {} updated, {} removed, {} impacted, {} breaking",
                    result.outcome.snapshot_id,
                    result.outcome.updated.len(),
                    result.outcome.removed.len(),
                    result.outcome.impacted.len(),
                    breaking
                );
                for report in result.reports.iter().filter(|r| r.is_breaking()) {
                    println!("  BREAKING {} (score {:.0})", report.file_path, report.risk_score);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Analysis failed: {}", e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spinner_template_valid() {
        assert!(ProgressStyle::default_spinner().template("{spinner} {msg}").is_ok());
    }
}
