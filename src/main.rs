use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use genrescope::db::models::Feature;
use genrescope::engine::{ClusterDetail, ClusterEngine, ClusterSummary, OverallStatistics, Projection};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "genrescope", version, about = "Music clip feature extraction and cluster analytics")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Directory holding scaler.json, kmeans.json and pca.json
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,

    /// Print results as JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract features from a corpus laid out as <DIR>/<genre>/<clip>
    Extract {
        /// Corpus root (defaults to config corpus_dir)
        dir: Option<PathBuf>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Fit the feature scaler on the stored table and save scaler.json
    FitScaler {
        /// Feature columns to use (default: every column outside the denylist)
        #[arg(long, num_args = 1.., value_delimiter = ',')]
        columns: Option<Vec<String>>,
    },

    /// Assign stored songs to clusters and store their projections
    Assign,

    /// Summaries of all clusters
    Clusters,

    /// One cluster with its songs ranked by distance to the centroid
    Cluster {
        /// Cluster id
        #[arg(allow_negative_numbers = true)]
        id: i64,

        /// Number of ranked songs to print (JSON output always has all)
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// All songs of one cluster with their stored projection coordinates
    Songs {
        /// Cluster id
        #[arg(allow_negative_numbers = true)]
        id: i64,
    },

    /// 2D and 3D projections of every song and centroid
    Projection,

    /// Overall feature ranges and cluster sizes
    Stats,

    /// Search songs by filename or genre (case-insensitive)
    Search {
        /// Substring to look for
        query: String,
    },

    /// Describe the extracted features
    Features,
}

#[derive(Serialize)]
struct FeatureInfo {
    name: &'static str,
    label: &'static str,
    unit: &'static str,
    description: &'static str,
    extraction: &'static str,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = genrescope::config::AppConfig::load();

    // Resolve paths: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(genrescope::config::default_db_path);
    let models_dir = cli
        .models_dir
        .or(config.models_dir.clone())
        .unwrap_or_else(genrescope::config::default_models_dir);
    log::info!("Database: {}", db_path.display());
    log::info!("Models: {}", models_dir.display());

    let db = genrescope::db::Database::open(&db_path).context("Failed to open database")?;

    match cli.command {
        Commands::Extract { dir, jobs } => {
            let root = dir.or(config.corpus_dir.clone()).ok_or_else(|| {
                anyhow::anyhow!("No corpus directory. Pass DIR or set corpus_dir in config.")
            })?;
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };

            let report = genrescope::analyzer::extract_corpus(&db, &root, &config.extractor, workers)
                .context("Extraction failed")?;
            println!(
                "Extraction complete: {} extracted, {} failed",
                report.extracted, report.failed
            );
            for f in &report.failures {
                println!("  {}/{}: {}", f.genre, f.filename, f.error);
            }
        }

        Commands::FitScaler { columns } => {
            let state = genrescope::normalize::fit_from_db(
                &db,
                columns.as_deref(),
                &config.normalizer.exclude_columns,
            )
            .context("Failed to fit scaler")?;
            let path = models_dir.join(genrescope::model::SCALER_FILE);
            state.save(&path).context("Failed to save scaler")?;
            println!(
                "Scaler fitted on {} columns, saved to {}",
                state.columns.len(),
                path.display()
            );
        }

        Commands::Assign => {
            let artifacts = genrescope::model::Artifacts::load(&models_dir).context("Failed to load models")?;
            let result = genrescope::assign::assign_clusters(&db, &artifacts).context("Assignment failed")?;
            if result.filled_cells > 0 {
                println!("Note: {} missing feature values read as 0", result.filled_cells);
            }
            println!("Assigned {} songs", result.assigned);
            for (id, size) in result.cluster_sizes.iter().enumerate() {
                println!("  cluster {:>2}: {}", id, size);
            }
        }

        Commands::Clusters => {
            let engine = open_engine(&db, &models_dir)?;
            let overview = engine.clusters();
            if cli.json {
                return print_json(&overview);
            }
            println!(
                "{} songs in {} clusters",
                overview.total_songs, overview.total_clusters
            );
            println!();
            print_summary_table(&overview.clusters);
        }

        Commands::Cluster { id, limit } => {
            let engine = open_engine(&db, &models_dir)?;
            let detail = engine.cluster_detail(id)?;
            if cli.json {
                return print_json(&detail);
            }
            print_cluster_detail(&detail, limit);
        }

        Commands::Songs { id } => {
            let engine = open_engine(&db, &models_dir)?;
            let songs = engine.cluster_songs(id)?;
            if cli.json {
                return print_json(&songs);
            }
            println!(
                "{:<28} {:<10} {:>7} {:>7} {:>7} {:>7} {:>7} {:>7}",
                "Song", "Genre", "BPM", "PC1", "PC2", "3D-1", "3D-2", "3D-3"
            );
            println!("{}", "-".repeat(90));
            for s in &songs {
                println!(
                    "{:<28} {:<10} {:>7.1} {:>7.3} {:>7.3} {:>7.3} {:>7.3} {:>7.3}",
                    truncate(&s.filename, 28),
                    truncate(&s.genre, 10),
                    s.features.tempo,
                    s.pca_2d[0],
                    s.pca_2d[1],
                    s.pca_3d[0],
                    s.pca_3d[1],
                    s.pca_3d[2],
                );
            }
            println!();
            println!("{} songs in cluster {}", songs.len(), id);
        }

        Commands::Projection => {
            let engine = open_engine(&db, &models_dir)?;
            let projection = engine.projection()?;
            if cli.json {
                return print_json(&projection);
            }
            print_projection(&projection);
        }

        Commands::Stats => {
            let counts = db.counts().context("Failed to get stats")?;
            let assigned = counts.fully_assigned();
            if cli.json {
                anyhow::ensure!(assigned, "Corpus is not fully assigned; run `genrescope assign` first");
                let engine = open_engine(&db, &models_dir)?;
                return print_json(&engine.overall_statistics());
            }

            println!("Corpus Statistics");
            println!("=================");
            println!("Total songs:     {}", counts.total_songs);
            println!("Assigned songs:  {}", counts.assigned_songs);
            println!();

            if !counts.genres.is_empty() {
                println!("Genres:");
                for (genre, count) in &counts.genres {
                    println!("  {:<20} {}", genre, count);
                }
                println!();
            }

            if counts.total_songs == 0 {
                println!("No songs yet; run `genrescope extract` first.");
            } else if assigned {
                let engine = open_engine(&db, &models_dir)?;
                print_overall_statistics(&engine.overall_statistics());
            } else {
                println!("Run `genrescope assign` to see cluster statistics.");
            }
        }

        Commands::Search { query } => {
            let engine = open_engine(&db, &models_dir)?;
            let results = engine.search(&query);
            if cli.json {
                return print_json(&results);
            }
            if results.is_empty() {
                println!("No songs match '{}'", query);
            }
            for r in &results {
                println!("{:<30} {:<12} cluster {}", r.filename, r.genre, r.cluster);
            }
        }

        Commands::Features => {
            let features: Vec<FeatureInfo> = Feature::ALL
                .iter()
                .map(|f| FeatureInfo {
                    name: f.column(),
                    label: f.label(),
                    unit: f.unit(),
                    description: f.description(),
                    extraction: f.extraction(),
                })
                .collect();
            if cli.json {
                return print_json(&features);
            }
            for f in &features {
                println!("{:<14} {:<11} {}", f.name, f.unit, f.description);
                println!("{:<14} {}", "", f.extraction);
            }
        }
    }

    Ok(())
}

fn open_engine(db: &genrescope::db::Database, models_dir: &std::path::Path) -> Result<ClusterEngine> {
    ClusterEngine::open(db, models_dir).context("Failed to load cluster engine")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
}

fn fmt_opt(v: Option<f64>, precision: usize) -> String {
    match v {
        Some(x) => format!("{:.*}", precision, x),
        None => "-".to_string(),
    }
}

/// Print one row per cluster with mean features and dominant genre.
fn print_summary_table(clusters: &[ClusterSummary]) {
    println!(
        "{:>3} {:>6} {:>6}  {:>7} {:>7} {:>7} {:>7} {:>7}  {}",
        "ID", "Songs", "%", "BPM", "Eng", "Loud", "Val", "Dnc", "Top genre"
    );
    println!("{}", "-".repeat(80));

    for c in clusters {
        let top = c
            .dominant_genre()
            .map(|g| format!("{} ({})", g.genre, g.count))
            .unwrap_or_default();
        println!(
            "{:>3} {:>6} {:>6.1}  {:>7} {:>7} {:>7} {:>7} {:>7}  {}",
            c.cluster_id,
            c.song_count,
            c.percentage,
            fmt_opt(c.mean(Feature::Tempo), 1),
            fmt_opt(c.mean(Feature::Energy), 3),
            fmt_opt(c.mean(Feature::Loudness), 3),
            fmt_opt(c.mean(Feature::Valence), 3),
            fmt_opt(c.mean(Feature::Danceability), 3),
            top,
        );
    }

    println!();
    println!("Eng=Energy  Loud=Loudness  Val=Valence  Dnc=Danceability");
}

fn print_cluster_detail(detail: &ClusterDetail, limit: usize) {
    let s = &detail.summary;
    println!(
        "Cluster {}: {} songs ({:.1}% of corpus)",
        s.cluster_id, s.song_count, s.percentage
    );
    println!();

    println!("{:<14} {:>10} {:>10}", "Feature", "Mean", "Std");
    for stat in &s.features {
        println!(
            "{:<14} {:>10} {:>10}",
            stat.feature.label(),
            fmt_opt(stat.mean, 3),
            fmt_opt(stat.std, 3)
        );
    }
    println!();

    if !s.genres.is_empty() {
        println!("Genres:");
        for g in &s.genres {
            println!("  {:<20} {}", g.genre, g.count);
        }
        println!();
    }

    println!(
        "{:<28} {:<10} {:>6} {:>7} {:>6} {:>6} {:>6}",
        "Song", "Genre", "Dist", "BPM", "Eng", "Val", "Dnc"
    );
    println!("{}", "-".repeat(75));
    for song in detail.songs.iter().take(limit) {
        println!(
            "{:<28} {:<10} {:>6.3} {:>7.1} {:>6.3} {:>6.3} {:>6.3}",
            truncate(&song.filename, 28),
            truncate(&song.genre, 10),
            song.distance_from_centroid,
            song.features.tempo,
            song.features.energy,
            song.features.valence,
            song.features.danceability,
        );
    }
    if detail.songs.len() > limit {
        println!("... and {} more", detail.songs.len() - limit);
    }
}

fn print_projection(p: &Projection) {
    for view in [&p.pca_2d, &p.pca_3d] {
        print!("{}D projection", view.dims);
        if let Some(ratio) = &view.explained_variance_ratio {
            let total: f64 = ratio.iter().sum();
            let parts: Vec<String> = ratio.iter().map(|r| format!("{:.1}%", r * 100.0)).collect();
            print!(" (explained variance {} = {:.1}%)", parts.join(" + "), total * 100.0);
        }
        println!();

        for c in &view.centroids {
            let coords: Vec<String> = c.coords.iter().map(|x| format!("{:>8.3}", x)).collect();
            println!("  centroid {:>2}: {}", c.cluster, coords.join(" "));
        }
        println!("  {} songs projected", view.points.len());
        println!();
    }
}

fn print_overall_statistics(stats: &OverallStatistics) {
    println!(
        "{:<14} {:>10} {:>10} {:>10} {:>10}",
        "Feature", "Min", "Max", "Mean", "Std"
    );
    println!("{}", "-".repeat(58));
    for r in &stats.feature_ranges {
        println!(
            "{:<14} {:>10} {:>10} {:>10} {:>10}",
            r.feature.label(),
            fmt_opt(r.min, 3),
            fmt_opt(r.max, 3),
            fmt_opt(r.mean, 3),
            fmt_opt(r.std, 3),
        );
    }
    println!();

    println!("Cluster sizes ({} clusters):", stats.total_clusters);
    for (id, size) in stats.cluster_sizes.iter().enumerate() {
        println!("  cluster {:>2}: {}", id, size);
    }
}
