use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use ssdam::clients::{
    GuidanceClient, GuidanceOutcome, GuidanceRequest, Language, LocalSearchClient, OpenDataClient,
    OpenDataQuery, ResponseFormat, Service, VisionClient,
};
use ssdam::config::{AppConfig, Settings};
use ssdam::dataset::{paginate, parse_region_filter, load_district_map, BinQuery, BinStore};
use ssdam::server::{self, AppState};

/// 쓰담 (ssdam): recycling coach.
///
/// Classifies photos of waste items, generates disposal guidance, and serves
/// Seoul waste-bin, drop-off and waste-request maps.
///
/// Examples:
///   ssdam serve --port 3000
///   ssdam nearby --lat 37.5563 --lng 126.9236 --radius 500
///   ssdam classify bottle.jpg --lang en
///   ssdam shops 마포구
///   ssdam collectors --filter kndNm=폐휴대폰 --rows 20
#[derive(Parser)]
#[command(name = "ssdam", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the web application.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, short, default_value_t = 3000)]
        port: u16,
    },
    /// List waste bins, optionally near a position.
    Nearby {
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        lng: Option<f64>,
        /// Search radius in metres (100..=1000). Requires --lat/--lng.
        #[arg(long)]
        radius: Option<f64>,
        /// District name, or 전체/all.
        #[arg(long)]
        region: Option<String>,
        /// Keyword over name and addresses.
        #[arg(long, short)]
        q: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Classify an image file and print disposal guidance.
    Classify {
        image: PathBuf,
        #[arg(long, default_value = "ko")]
        lang: String,
        /// Skip guidance generation.
        #[arg(long)]
        no_guidance: bool,
    },
    /// Search zero-waste shops in a region.
    Shops { region: String },
    /// Query a public open-data service.
    Collectors {
        #[arg(long, default_value = "recycling-collectors")]
        service: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        rows: u32,
        #[arg(long, default_value = "json")]
        format: String,
        /// Filter as FIELD=VALUE; repeatable.
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },
    /// Print the waste-request district map.
    Districts,
}

fn parse_filter(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("Expected FIELD=VALUE, got '{}'", s))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ssdam=info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct ClassifyOutput {
    classification: ssdam::clients::Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    guidance: Option<GuidanceOutcome>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = AppConfig::from(cli.settings);

    match cli.command {
        Command::Serve { host, port } => {
            let state = Arc::new(AppState::new(config));
            server::start(state, &host, port).await?;
        }

        Command::Nearby { lat, lng, radius, region, q, limit } => {
            let user_location = match (lat, lng) {
                (Some(lat), Some(lng)) => {
                    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                        bail!("Invalid coordinates. Lat: -90..90, Lng: -180..180");
                    }
                    Some((lat, lng))
                }
                (None, None) => None,
                _ => bail!("Provide both --lat and --lng"),
            };
            let query = BinQuery {
                region: parse_region_filter(region.as_deref()).map_err(anyhow::Error::msg)?,
                keyword: q.unwrap_or_default(),
                user_location,
                nearby: radius.is_some(),
                radius_m: radius,
            };

            let store = BinStore::new(config.bins_dir());
            let bins = store
                .shared()
                .with_context(|| format!("loading bins from {}", config.bins_dir().display()))?;
            let page = paginate(query.run(bins), limit);
            eprintln!("  🗑️  {} of {} bins", page.shown, page.total);
            print_json(&page)?;
        }

        Command::Classify { image, lang, no_guidance } => {
            let bytes = std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            let language = Language::from_code(&lang);
            let vision = VisionClient::new(config.vision.clone());
            let guidance = GuidanceClient::new(config.guidance.clone());

            let output = tokio::task::spawn_blocking(move || {
                let classification = vision.classify(&bytes);
                let guidance = match classification.tag() {
                    Some((tag, p)) if !no_guidance => {
                        Some(guidance.generate(&GuidanceRequest::new(tag, Some(p), language)))
                    }
                    _ => None,
                };
                ClassifyOutput { classification, guidance }
            })
            .await?;

            if let Some(g) = &output.guidance {
                eprintln!("\n{}\n", g.text());
            }
            print_json(&output)?;
        }

        Command::Shops { region } => {
            let client = LocalSearchClient::new(config.search.clone());
            let shops = tokio::task::spawn_blocking(move || client.shops_in(&region)).await??;
            print_json(&shops)?;
        }

        Command::Collectors { service, page, rows, format, filters } => {
            let service = Service::from_name(&service)
                .with_context(|| format!("unknown service '{}'", service))?;
            let mut query = OpenDataQuery::new(service)
                .page(page)
                .rows(rows)
                .format(ResponseFormat::parse(&format));
            for (field, value) in &filters {
                query = query.filter(field, value)?;
            }
            let client = OpenDataClient::new(config.open_data.clone());
            let payload = tokio::task::spawn_blocking(move || client.fetch(&query)).await??;
            print_json(&payload)?;
        }

        Command::Districts => {
            let map = load_district_map(&config.districts_dir())
                .with_context(|| format!("loading districts from {}", config.districts_dir().display()))?;
            print_json(&map)?;
        }
    }

    Ok(())
}
