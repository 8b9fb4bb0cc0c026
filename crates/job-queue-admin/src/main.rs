use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Table};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "jq-admin")]
#[command(about = "Job Queue Admin CLI", long_about = None)]
struct Args {
    /// REST API address
    #[arg(long, env = "JQ_API", default_value = "http://127.0.0.1:8080")]
    api: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Table,
    Json,
    Yaml,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a new job
    Submit {
        /// Job type, e.g. image-integration
        job_type: String,

        /// JSON payload (inline, or @path to read a file)
        #[arg(default_value = "{}")]
        payload: String,

        /// Automatic retries before the job is marked failed
        #[arg(short, long)]
        max_retries: Option<u32>,
    },

    /// Get job status
    Status {
        job_id: Uuid,
    },

    /// Show job counts per status
    Stats,

    /// Re-submit a failed job as a new job
    Retry {
        job_id: Uuid,
    },

    /// Show server health
    Health,
}

struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str) -> anyhow::Result<Value> {
        let response = self.http.get(format!("{}{}", self.base, path)).send().await?;
        Self::decode(response).await
    }

    async fn post(&self, path: &str, body: Option<&Value>) -> anyhow::Result<Value> {
        let mut request = self.http.post(format!("{}{}", self.base, path));
        if let Some(body) = body {
            request = request.json(body);
        }
        Self::decode(request.send().await?).await
    }

    async fn decode(response: reqwest::Response) -> anyhow::Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let message = body["error"].as_str().unwrap_or("no error message");
            anyhow::bail!("{} ({})", message, status);
        }
        Ok(body)
    }
}

fn read_payload(raw: &str) -> anyhow::Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload file {}", path))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("Payload is not valid JSON")
}

/// Prints `value` as json/yaml, or hands it to `table` for the table format.
fn render(format: Format, value: &Value, table: impl FnOnce(&Value) -> Table) -> anyhow::Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Format::Yaml => print!("{}", serde_yaml::to_string(value)?),
        Format::Table => println!("{}", table(value)),
    }
    Ok(())
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn field_table(value: &Value, fields: &[(&str, &str)]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Field", "Value"]);
    for (label, key) in fields {
        table.add_row(vec![label.to_string(), text(&value[*key])]);
    }
    table
}

fn submitted_table(value: &Value) -> Table {
    field_table(value, &[("Job ID", "job_id"), ("Status", "status")])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = ApiClient::new(&args.api);

    match args.command {
        Commands::Submit {
            job_type,
            payload,
            max_retries,
        } => {
            let mut body = json!({
                "job_type": job_type,
                "payload": read_payload(&payload)?,
            });
            if let Some(max_retries) = max_retries {
                body["max_retries"] = json!(max_retries);
            }

            let response = client.post("/api/v1/jobs", Some(&body)).await?;
            render(args.format, &response, submitted_table)?;
        }

        Commands::Status { job_id } => {
            let job = client.get(&format!("/api/v1/jobs/{}", job_id)).await?;
            render(args.format, &job, |job| {
                field_table(
                    job,
                    &[
                        ("ID", "id"),
                        ("Type", "job_type"),
                        ("Status", "status"),
                        ("Created", "created_at"),
                        ("Started", "started_at"),
                        ("Completed", "completed_at"),
                        ("Retries", "retry_count"),
                        ("Max Retries", "max_retries"),
                        ("Error", "error"),
                        ("Result", "result"),
                    ],
                )
            })?;
        }

        Commands::Stats => {
            let stats = client.get("/api/v1/stats").await?;
            render(args.format, &stats, |stats| {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_header(vec!["Status", "Jobs", ""]);
                for status in ["queued", "running", "succeeded", "failed"] {
                    let count = stats[status].as_u64().unwrap_or(0);
                    table.add_row(vec![
                        status.to_string(),
                        count.to_string(),
                        "█".repeat((count as usize).min(50)),
                    ]);
                }
                table
            })?;
        }

        Commands::Retry { job_id } => {
            let response = client
                .post(&format!("/api/v1/jobs/{}/retry", job_id), None)
                .await?;
            render(args.format, &response, submitted_table)?;
        }

        Commands::Health => {
            let health = client.get("/health").await?;
            render(args.format, &health, |health| {
                field_table(
                    health,
                    &[
                        ("Status", "status"),
                        ("Workers", "workers"),
                        ("Busy Workers", "busy_workers"),
                        ("Queued", "queued"),
                    ],
                )
            })?;
        }
    }

    Ok(())
}
