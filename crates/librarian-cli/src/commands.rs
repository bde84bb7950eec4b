use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "librarian")]
#[command(
    about = "Consolidate scattered files into one deduplicated, searchable library",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan the source roots and build the library from scratch
    Build,
    /// Continue an interrupted build from its checkpoint
    Resume,
    /// Search the catalog by file name
    Search {
        /// Text to look for in file names (empty lists everything)
        #[arg(default_value = "")]
        term: String,
        /// Restrict results to a category
        #[arg(short, long)]
        category: Option<String>,
        /// Match the name and category exactly instead of as substrings
        #[arg(short, long)]
        exact: bool,
        /// Maximum number of results
        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },
    /// List catalog categories with their file counts
    Categories,
    /// Show catalog totals and recent runs
    Status,
    /// Print configuration values
    PrintConfig,
}
