//! parley-cli - command-line client for the Parley HTTP API.
//!
//! # Subcommands
//! - `search <query> [-n <limit>] [--mode <mode>] [--messages] [--json]` - search
//!   conversations, or individual messages with `--messages`
//! - `similar <id> [-n <limit>] [--json]`                   - find similar conversations
//! - `cluster [--background]`                               - run auto-clustering
//! - `status`                                               - show server health

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8791";
const DEFAULT_LIMIT: usize = 10;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "parley-cli",
    version,
    about = "Search and cluster recorded conversations"
)]
struct Cli {
    /// Parley HTTP server URL (overrides PARLEY_HTTP_URL env var)
    #[arg(long, env = "PARLEY_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Text,
    Semantic,
    Hybrid,
}

impl Mode {
    fn as_str(&self) -> &'static str {
        match self {
            Mode::Text => "text",
            Mode::Semantic => "semantic",
            Mode::Hybrid => "hybrid",
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Search conversations
    Search {
        /// Query text to search for
        query: String,

        /// Maximum number of results to return
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Search mode
        #[arg(long, value_enum, default_value_t = Mode::Hybrid)]
        mode: Mode,

        /// Restrict results to one project path
        #[arg(long)]
        project: Option<String>,

        /// Search individual messages instead of conversations
        #[arg(long)]
        messages: bool,

        /// Restrict message search to one role (e.g. user, assistant)
        #[arg(long, requires = "messages")]
        role: Option<String>,

        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Find conversations similar to an existing one
    Similar {
        /// Conversation UUID
        id: String,

        /// Maximum number of results to return
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Minimum similarity score, overriding the server default
        #[arg(long)]
        threshold: Option<f32>,

        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Regenerate topic clusters from stored embeddings
    Cluster {
        /// Queue the run instead of waiting for it
        #[arg(long)]
        background: bool,
    },

    /// Show Parley server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub similarity: f64,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub count: usize,
    pub took_ms: Option<u64>,
}

// ============================================================================
// Output helpers
// ============================================================================

/// One human-readable line per hit: truncated content plus a percent score.
pub fn format_hit(hit: &SearchHit) -> String {
    let preview: String = hit.content.chars().take(80).collect();
    let ellipsis = if hit.content.chars().count() > 80 {
        "..."
    } else {
        ""
    };
    format!(
        "{}  {:>4.0}%  {}{}",
        hit.id,
        hit.similarity * 100.0,
        preview,
        ellipsis
    )
}

fn print_hits(resp: &SearchResponse) {
    if resp.results.is_empty() {
        eprintln!("No results found");
        return;
    }
    for hit in &resp.results {
        println!("{}", format_hit(hit));
    }
    if let Some(ms) = resp.took_ms {
        eprintln!("\n{} results in {}ms", resp.count, ms);
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

fn fetch_json(
    request: reqwest::blocking::RequestBuilder,
    url: &str,
) -> anyhow::Result<serde_json::Value> {
    let resp = match request.send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("parley-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("parley-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    Ok(resp.json()?)
}

#[allow(clippy::too_many_arguments)]
fn do_search(
    server: &str,
    query: &str,
    limit: usize,
    mode: Mode,
    project: Option<String>,
    messages: bool,
    role: Option<String>,
    json_output: bool,
) -> anyhow::Result<()> {
    let url = if messages {
        format!("{}/search/messages", server)
    } else {
        format!("{}/search", server)
    };
    let body = serde_json::json!({
        "query": query,
        "limit": limit,
        "mode": mode.as_str(),
        "project_path": project,
        "role": role,
    });

    let data = fetch_json(client(30)?.post(&url).json(&body), &url)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        let resp: SearchResponse = serde_json::from_value(data)?;
        print_hits(&resp);
    }
    Ok(())
}

fn do_similar(
    server: &str,
    id: &str,
    limit: usize,
    threshold: Option<f32>,
    json_output: bool,
) -> anyhow::Result<()> {
    let mut url = format!("{}/similar/{}?limit={}", server, id, limit);
    if let Some(t) = threshold {
        url.push_str(&format!("&threshold={}", t));
    }
    let data = fetch_json(client(30)?.get(&url), &url)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        let resp: SearchResponse = serde_json::from_value(data)?;
        print_hits(&resp);
    }
    Ok(())
}

fn do_cluster(server: &str, background: bool) -> anyhow::Result<()> {
    let url = format!("{}/clusters/auto-generate", server);
    let body = serde_json::json!({ "background": background });
    let data = fetch_json(client(120)?.post(&url).json(&body), &url)?;

    if background {
        println!("Clustering run queued");
    } else if let Some(message) = data["message"].as_str() {
        println!("{}", message);
    } else {
        println!(
            "Created {} clusters covering {} of {} conversations",
            data["clusters_created"],
            data["conversations_clustered"],
            data["total_candidates"]
        );
    }
    Ok(())
}

fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client(10)?.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Parley server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:       {}", body["version"].as_str().unwrap_or("?"));
            println!("PostgreSQL:    {}", body["postgresql"].as_str().unwrap_or("?"));
            println!("pgvector:      {}", body["pgvector"].as_str().unwrap_or("?"));
            println!("Backend:       {}", body["backend"].as_str().unwrap_or("?"));
            println!("Socket:        {}", body["socket"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            let status = r.status();
            eprintln!("parley-cli: server unhealthy (HTTP {})", status);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("parley-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Search {
            query,
            limit,
            mode,
            project,
            messages,
            role,
            json,
        } => do_search(&server, &query, limit, mode, project, messages, role, json),
        Commands::Similar {
            id,
            limit,
            threshold,
            json,
        } => do_similar(&server, &id, limit, threshold, json),
        Commands::Cluster { background } => do_cluster(&server, background),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("parley-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_hit(id: &str, content: &str, similarity: f64) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            content: content.to_string(),
            similarity,
        }
    }

    #[test]
    fn test_format_hit_includes_percent_score() {
        let hit = mock_hit("7b5c24ab-1234-5678-9abc-def012345678", "Fixing auth", 0.87);
        let line = format_hit(&hit);

        assert!(line.contains("87%"), "line was: {line}");
        assert!(line.contains("Fixing auth"));
        assert!(line.starts_with("7b5c24ab"));
    }

    #[test]
    fn test_format_hit_truncates_long_content() {
        let long = "A".repeat(200);
        let hit = mock_hit("id", &long, 0.5);
        let line = format_hit(&hit);

        assert!(line.ends_with("..."), "line was: {line}");
        assert!(!line.contains(&"A".repeat(81)));
    }

    #[test]
    fn test_format_hit_zero_score_text_only() {
        let hit = mock_hit("id", "text-only match", 0.0);
        let line = format_hit(&hit);

        assert!(line.contains("0%"), "line was: {line}");
    }

    #[test]
    fn test_search_response_parses_with_extra_fields() {
        let json = serde_json::json!({
            "results": [
                {"id": "a", "content": "x", "metadata": {}, "similarity": 0.9}
            ],
            "count": 1,
            "mode": "hybrid",
            "took_ms": 12
        });
        let resp: SearchResponse = serde_json::from_value(json).unwrap();

        assert_eq!(resp.count, 1);
        assert_eq!(resp.took_ms, Some(12));
        assert!((resp.results[0].similarity - 0.9).abs() < f64::EPSILON);
    }
}
