use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory holding config.yaml and the model cache
    #[clap(long, default_value = ".")]
    pub base_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Filter a JSON array of documents
    Search {
        /// JSON file holding an array of documents
        #[clap(short, long)]
        data: PathBuf,

        /// Filter expression as JSON, e.g. '{"status": {"$keyword": "paid"}}'
        #[clap(short, long, default_value = "{}")]
        filter: String,

        /// Match `$text` on tokens only, without embeddings
        #[clap(long, default_value = "false")]
        no_semantic: bool,

        /// Print the number of matches instead of the documents
        #[clap(short, long, default_value = "false")]
        count: bool,
    },

    /// Print the embedding of a text
    Embed {
        text: String,

        /// Embed as a passage instead of a query
        #[clap(long, default_value = "false")]
        passage: bool,
    },

    /// Cosine similarity between a query and a passage
    Similarity {
        /// Search string (query role)
        query: String,

        /// Candidate text (passage role)
        passage: String,
    },

    /// Rank stored few-shot examples against a search
    Examples {
        /// Search to rank examples against
        search: String,

        /// JSON file holding an array of examples (built-in set if omitted)
        #[clap(short, long)]
        file: Option<PathBuf>,

        /// Show only the best N examples
        #[clap(short, long)]
        limit: Option<usize>,
    },
}
