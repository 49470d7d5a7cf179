use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, Response};
use serde_json::json;

#[derive(Parser)]
#[command(name = "risk-forecast-cli")]
#[command(about = "Risk Forecast CLI", long_about = None)]
struct Cli {
    #[arg(short, long, env = "RISK_FORECAST_ENDPOINT", default_value = "http://localhost:5000")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List delegations
    Delegations,

    /// Historical or forecast incidents for a delegation
    Incidents {
        #[arg(short, long)]
        delegation: i64,

        /// YYYY-MM-DD, or YYYY-MM for monthly queries
        #[arg(short = 'D', long)]
        date: Option<String>,

        /// day, week or month
        #[arg(short, long, default_value = "day")]
        period: String,
    },

    /// Risk-zone shares for the last 30 days
    Zones,

    /// Daily per-risk counts for a delegation
    Stats {
        #[arg(short, long)]
        delegation: i64,

        #[arg(short = 'n', long, default_value = "30")]
        dias: i64,
    },

    /// Forecast risk counts for the coming days
    Estimates {
        #[arg(short, long)]
        delegation: i64,

        #[arg(short = 'n', long, default_value = "7")]
        dias: i64,
    },

    /// Train a delegation's model now
    Train {
        #[arg(value_name = "DELEGATION_ID")]
        delegation: i64,
    },

    /// Confirm or correct a forecast incident
    Feedback {
        #[arg(value_name = "INCIDENT_ID")]
        id: String,

        #[arg(short, long)]
        delegation: i64,

        #[arg(short, long)]
        tipo: String,

        #[arg(short, long)]
        ubicacion: String,

        #[arg(short, long)]
        fecha: String,

        #[arg(short = 'H', long)]
        hora: String,

        #[arg(short, long)]
        risk_level: i64,

        /// Mark the forecast as not confirmed
        #[arg(long)]
        rejected: bool,
    },

    /// Promote confirmed forecasts into the incident history
    Migrate,

    /// Check server health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let endpoint = cli.endpoint.trim_end_matches('/');

    let response = match cli.command {
        Commands::Delegations => client.get(format!("{}/delegaciones", endpoint)).send().await,

        Commands::Incidents {
            delegation,
            date,
            period,
        } => {
            let mut query = vec![
                ("delegacion_id", delegation.to_string()),
                ("periodo", period),
            ];
            if let Some(date) = date {
                query.push(("fecha", date));
            }
            client
                .get(format!("{}/incidentes", endpoint))
                .query(&query)
                .send()
                .await
        }

        Commands::Zones => {
            client
                .get(format!("{}/api/zonas_riesgo", endpoint))
                .send()
                .await
        }

        Commands::Stats { delegation, dias } => {
            client
                .get(format!("{}/estadisticas_historicas", endpoint))
                .query(&[("delegacion_id", delegation), ("dias", dias)])
                .send()
                .await
        }

        Commands::Estimates { delegation, dias } => {
            client
                .get(format!("{}/api/estimaciones_riesgo", endpoint))
                .query(&[("delegacion_id", delegation), ("dias", dias)])
                .send()
                .await
        }

        Commands::Train { delegation } => {
            client
                .post(format!("{}/modelos/{}/entrenar", endpoint, delegation))
                .send()
                .await
        }

        Commands::Feedback {
            id,
            delegation,
            tipo,
            ubicacion,
            fecha,
            hora,
            risk_level,
            rejected,
        } => {
            client
                .post(format!("{}/retroalimentacion", endpoint))
                .json(&json!({
                    "incidente_id": id,
                    "delegacion_id": delegation,
                    "tipo": tipo,
                    "ubicacion": ubicacion,
                    "fecha": fecha,
                    "hora": hora,
                    "nivel_riesgo_id": risk_level,
                    "confirmado": !rejected,
                }))
                .send()
                .await
        }

        Commands::Migrate => {
            client
                .post(format!("{}/migrar_predicciones", endpoint))
                .send()
                .await
        }

        Commands::Health => client.get(format!("{}/health", endpoint)).send().await,
    }
    .with_context(|| format!("request to {} failed", endpoint))?;

    print_body(response).await
}

async fn print_body(response: Response) -> Result<()> {
    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .context("response body is not JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        anyhow::bail!("server returned {}", status);
    }
    Ok(())
}
