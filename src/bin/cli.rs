//! Targetwise CLI - offline taxonomy management against the SQLite store
//!
//! Usage: targetwise-cli [OPTIONS] <COMMAND>
//!
//! Supports JSON output for scripting.

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use targetwise_lib::db::{CategoryStore, Database, TargetingCategory};
use targetwise_lib::hierarchy::{self, CategoryIndex, CategoryNode};
use targetwise_lib::settings::{self, SettingsStore};
use targetwise_lib::{import, taxonomy};

// ============================================================================
// Main CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "targetwise-cli")]
#[command(version, about = "Targetwise taxonomy CLI", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Database path (default: auto-detect)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Detailed logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ImportFormat {
    /// Category records (`[{id, name, parentId, level, size, categoryType}]`)
    Records,
    /// Meta detailed-targeting browse dump (entries with `path`)
    Meta,
}

#[derive(Subcommand)]
enum Commands {
    /// Import categories from a file, or the bundled taxonomy when no file is given
    Import {
        /// JSON file to import
        file: Option<PathBuf>,
        #[arg(long, short, value_enum, default_value = "records")]
        format: ImportFormat,
        /// Delete existing categories first
        #[arg(long)]
        replace: bool,
    },
    /// Print the category tree
    Tree {
        /// Start from this category instead of the roots
        #[arg(long)]
        root: Option<String>,
        /// Maximum depth to print
        #[arg(long, short)]
        depth: Option<usize>,
    },
    /// Case-insensitive name search
    Search {
        query: String,
        #[arg(long, short, default_value = "20")]
        limit: usize,
    },
    /// Show the path from the root to a category
    Breadcrumbs { id: String },
    /// Export all categories as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(long, short)]
        out: Option<PathBuf>,
        /// Nested tree instead of flat records
        #[arg(long)]
        tree: bool,
    },
    /// Category counts and hierarchy health
    Stats,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run_cli(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<(), String> {
    // Handle completions first (no DB needed)
    if let Commands::Completions { shell } = &cli.command {
        generate(*shell, &mut Cli::command(), "targetwise-cli", &mut std::io::stdout());
        return Ok(());
    }

    let settings = SettingsStore::load(&settings::default_config_dir()).snapshot();
    let db_path = settings::find_database(cli.db.as_deref(), &settings);
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
    }
    let db = Database::new(&db_path).map_err(|e| format!("Failed to open {}: {}", db_path.display(), e))?;
    log::debug!("[CLI] Database: {}", db_path.display());

    match cli.command {
        Commands::Import { file, format, replace } => handle_import(&db, file, format, replace, cli.json),
        Commands::Tree { root, depth } => handle_tree(&db, root.as_deref(), depth, cli.json),
        Commands::Search { query, limit } => handle_search(&db, &query, limit, cli.json),
        Commands::Breadcrumbs { id } => handle_breadcrumbs(&db, &id, cli.json),
        Commands::Export { out, tree } => handle_export(&db, out, tree),
        Commands::Stats => handle_stats(&db, cli.json),
        Commands::Completions { .. } => unreachable!(),
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn handle_import(
    db: &Database,
    file: Option<PathBuf>,
    format: ImportFormat,
    replace: bool,
    json: bool,
) -> Result<(), String> {
    let (categories, source) = match file {
        Some(path) => {
            let content = fs::read_to_string(&path)
                .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
            let categories = match format {
                ImportFormat::Records => import::parse_records(&content),
                ImportFormat::Meta => import::parse_meta_dump(&content),
            }
            .map_err(|e| e.to_string())?;
            (categories, path.display().to_string())
        }
        None => {
            let asset = taxonomy::bundled().map_err(|e| e.to_string())?;
            (asset.categories, format!("bundled taxonomy v{}", asset.version))
        }
    };

    if replace {
        let removed = db.delete_all_categories().map_err(|e| e.to_string())?;
        log::info!("[CLI] Removed {} existing categories", removed);
    }
    let inserted = db.bulk_insert(&categories).map_err(|e| e.to_string())?;
    let orphans = hierarchy::orphans(&db.list().map_err(|e| e.to_string())?);

    if json {
        println!(
            "{}",
            serde_json::json!({"inserted": inserted, "source": source, "orphans": orphans.len()})
        );
    } else {
        println!("Imported {} categories from {}", inserted, source);
        if !orphans.is_empty() {
            println!("Warning: {} categories are not reachable from a root", orphans.len());
        }
    }
    Ok(())
}

fn print_node(node: &CategoryNode, indent: usize, max_depth: Option<usize>) {
    println!(
        "{}{} [{}] ({})",
        "  ".repeat(indent),
        node.category.name,
        node.category.id,
        node.category.size
    );
    if max_depth.map_or(true, |d| indent + 1 < d) {
        for child in &node.children {
            print_node(child, indent + 1, max_depth);
        }
    }
}

fn handle_tree(db: &Database, root: Option<&str>, depth: Option<usize>, json: bool) -> Result<(), String> {
    let categories = db.list().map_err(|e| e.to_string())?;
    let mut tree = hierarchy::build_tree(&categories);

    if let Some(root_id) = root {
        tree = find_subtree(tree, root_id)
            .map(|node| vec![node])
            .ok_or_else(|| format!("Category '{}' not found in tree", root_id))?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&tree).map_err(|e| e.to_string())?);
        return Ok(());
    }
    if tree.is_empty() {
        println!("No categories. Run `targetwise-cli import` first.");
    }
    for node in &tree {
        print_node(node, 0, depth);
    }
    Ok(())
}

fn find_subtree(nodes: Vec<CategoryNode>, id: &str) -> Option<CategoryNode> {
    for node in nodes {
        if node.category.id == id {
            return Some(node);
        }
        if let Some(found) = find_subtree(node.children, id) {
            return Some(found);
        }
    }
    None
}

fn handle_search(db: &Database, query: &str, limit: usize, json: bool) -> Result<(), String> {
    let results = db.search(query).map_err(|e| e.to_string())?;
    let all = db.list().map_err(|e| e.to_string())?;
    let index = CategoryIndex::new(&all);
    let shown: Vec<&TargetingCategory> = results.iter().take(limit).collect();

    if json {
        let items: Vec<_> = shown
            .iter()
            .map(|c| serde_json::json!({"category": c, "breadcrumbs": index.breadcrumbs(&c.id)}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&items).map_err(|e| e.to_string())?);
        return Ok(());
    }

    if shown.is_empty() {
        println!("No categories match '{}'", query);
        return Ok(());
    }
    for c in &shown {
        println!("{:<40} {:<14} {}", index.breadcrumbs(&c.id).join(" > "), c.category_type.as_str(), c.size);
    }
    if results.len() > shown.len() {
        println!("... {} more", results.len() - shown.len());
    }
    Ok(())
}

fn handle_breadcrumbs(db: &Database, id: &str, json: bool) -> Result<(), String> {
    let all = db.list().map_err(|e| e.to_string())?;
    let crumbs = hierarchy::breadcrumbs(&all, id);
    if json {
        println!("{}", serde_json::json!({"id": id, "breadcrumbs": crumbs}));
    } else {
        println!("{}", crumbs.join(" > "));
    }
    Ok(())
}

fn handle_export(db: &Database, out: Option<PathBuf>, tree: bool) -> Result<(), String> {
    let categories = db.list().map_err(|e| e.to_string())?;
    let content = if tree {
        serde_json::to_string_pretty(&hierarchy::build_tree(&categories))
    } else {
        serde_json::to_string_pretty(&categories)
    }
    .map_err(|e| e.to_string())?;

    match out {
        Some(path) => {
            fs::write(&path, content).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
            eprintln!("Exported {} categories to {}", categories.len(), path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

fn handle_stats(db: &Database, json: bool) -> Result<(), String> {
    let categories = db.list().map_err(|e| e.to_string())?;
    let by_type: HashMap<String, usize> = db.count_by_type().map_err(|e| e.to_string())?.into_iter().collect();
    let tree = hierarchy::build_tree(&categories);
    let orphans = hierarchy::orphans(&categories);
    let max_level = categories.iter().map(|c| c.level).max().unwrap_or(0);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "total": categories.len(),
                "byType": by_type,
                "roots": tree.len(),
                "inTree": hierarchy::count_nodes(&tree),
                "orphans": orphans.len(),
                "maxLevel": max_level,
            })
        );
        return Ok(());
    }

    println!("Categories: {}", categories.len());
    let mut types: Vec<_> = by_type.iter().collect();
    types.sort();
    for (category_type, count) in types {
        println!("  {:<14} {}", category_type, count);
    }
    println!("Roots:      {}", tree.len());
    println!("In tree:    {}", hierarchy::count_nodes(&tree));
    println!("Orphans:    {}", orphans.len());
    println!("Max level:  {}", max_level);
    for orphan in orphans.iter().take(10) {
        println!("  orphan: {} [{}] parent={}", orphan.name, orphan.id, orphan.parent().unwrap_or("-"));
    }
    Ok(())
}
