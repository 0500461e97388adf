use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use eogate_engine::config::{CatalogSnapshot, default_config_path, load_config, load_config_from_path};
use eogate_engine::{Crunch, ErrorKind, Gateway, GatewayError, OverlapRule, SearchResults};
use eogate_types::{BoundingBox, Geometry, PageCursor, SearchMode, SearchRequest};
use eogate_util::parse_datetime_utc;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let matches = build_cli().get_matches();
    match run(&matches).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(exit_code(&error))
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn exit_code(error: &anyhow::Error) -> u8 {
    let Some(error) = error.downcast_ref::<GatewayError>() else {
        return 1;
    };
    match error.kind() {
        ErrorKind::IncompleteQuery | ErrorKind::InvalidParameter => 2,
        ErrorKind::UnsupportedProductType | ErrorKind::UnknownProvider => 3,
        ErrorKind::FallbackExhausted | ErrorKind::Transport | ErrorKind::Auth | ErrorKind::Extraction => 4,
        ErrorKind::Configuration | ErrorKind::MappingSyntax => 5,
        ErrorKind::Cancelled => 130,
    }
}

fn build_cli() -> Command {
    let product_type = Arg::new("product-type")
        .long("product-type")
        .short('p')
        .action(ArgAction::Set)
        .help("Canonical product type, e.g. S2_MSI_L1C");
    let provider = Arg::new("provider")
        .long("provider")
        .action(ArgAction::Set)
        .help("Restrict to one provider");

    Command::new("eogate")
        .about("Federated Earth-observation product search")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .action(ArgAction::Set)
                .value_parser(value_parser!(PathBuf))
                .help("Providers file (defaults to $EOGATE_PROVIDERS_PATH or the user config dir)"),
        )
        .subcommand(
            Command::new("search")
                .about("Search products across providers")
                .arg(product_type.clone().required(true))
                .arg(provider.clone())
                .arg(
                    Arg::new("bbox")
                        .long("bbox")
                        .action(ArgAction::Set)
                        .conflicts_with("geometry")
                        .help("west,south,east,north in degrees"),
                )
                .arg(Arg::new("geometry").long("geometry").action(ArgAction::Set).help("WKT geometry"))
                .arg(Arg::new("start").long("start").action(ArgAction::Set).help("Start of the time range"))
                .arg(Arg::new("end").long("end").action(ArgAction::Set).help("End of the time range"))
                .arg(
                    Arg::new("filter")
                        .long("filter")
                        .short('f')
                        .action(ArgAction::Append)
                        .help("Extra filter as name=value; JSON values are accepted"),
                )
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .action(ArgAction::Set)
                        .default_value("one-page")
                        .value_parser(value_parser!(SearchMode))
                        .help("one-page, all-pages or count-only"),
                )
                .arg(Arg::new("page").long("page").action(ArgAction::Set).value_parser(value_parser!(u32)))
                .arg(
                    Arg::new("items-per-page")
                        .long("items-per-page")
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("cursor")
                        .long("cursor")
                        .action(ArgAction::Set)
                        .help("next_cursor JSON printed by a previous search"),
                )
                .arg(
                    Arg::new("count")
                        .long("count")
                        .action(ArgAction::SetTrue)
                        .help("Also report the total number of matches"),
                ),
        )
        .subcommand(
            Command::new("queryables")
                .about("List the parameters a product type can be searched with")
                .arg(product_type.clone().required(true))
                .arg(provider.clone()),
        )
        .subcommand(
            Command::new("providers")
                .about("List usable providers in search order")
                .arg(product_type.clone()),
        )
        .subcommand(
            Command::new("product-types")
                .about("List product types")
                .arg(provider.clone()),
        )
        .subcommand(Command::new("check-config").about("Compile the providers file and report excluded providers"))
        .subcommand(
            Command::new("crunch")
                .about("Filter a results file written by `search`")
                .arg(
                    Arg::new("input")
                        .required(true)
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(PathBuf))
                        .help("FeatureCollection printed by a previous search"),
                )
                .arg(Arg::new("start").long("start").action(ArgAction::Set).help("Drop products sensed before"))
                .arg(Arg::new("end").long("end").action(ArgAction::Set).help("Drop products sensed after"))
                .arg(
                    Arg::new("property")
                        .long("property")
                        .action(ArgAction::Append)
                        .help("Property comparison such as cloudCover<=20 (<, <=, =, !=, >=, >)"),
                )
                .arg(
                    Arg::new("overlap")
                        .long("overlap")
                        .action(ArgAction::Set)
                        .help("Search extent west,south,east,north for footprint filters"),
                )
                .arg(
                    Arg::new("minimum-overlap")
                        .long("minimum-overlap")
                        .action(ArgAction::Set)
                        .requires("overlap")
                        .value_parser(value_parser!(f64))
                        .help("Minimum shared area in percent"),
                )
                .arg(Arg::new("contains").long("contains").action(ArgAction::SetTrue).requires("overlap"))
                .arg(Arg::new("within").long("within").action(ArgAction::SetTrue).requires("overlap"))
                .arg(Arg::new("intersects").long("intersects").action(ArgAction::SetTrue).requires("overlap"))
                .group(
                    clap::ArgGroup::new("overlap-rule")
                        .args(["minimum-overlap", "contains", "within", "intersects"])
                        .multiple(false),
                )
                .arg(
                    Arg::new("remove-doubles")
                        .long("remove-doubles")
                        .action(ArgAction::SetTrue)
                        .help("Keep the first product of each id"),
                )
                .arg(
                    Arg::new("latest-by-name")
                        .long("latest-by-name")
                        .action(ArgAction::Set)
                        .help("Title regex with a (?P<tileid>...) group; keeps one product per tile"),
                ),
        )
}

async fn run(matches: &ArgMatches) -> Result<ExitCode> {
    let config = matches.get_one::<PathBuf>("config");
    match matches.subcommand() {
        Some(("check-config", _)) => check_config(config),
        Some(("crunch", sub)) => crunch(sub),
        Some((name, sub)) => {
            let gateway = Gateway::from_config_file(config.map(PathBuf::as_path))?;
            match name {
                "search" => search(&gateway, sub).await,
                "queryables" => queryables(&gateway, sub).await,
                "providers" => {
                    let product_type = sub.get_one::<String>("product-type").map(String::as_str);
                    print_json(&json!(gateway.available_providers(product_type)))
                }
                "product-types" => {
                    let provider = sub.get_one::<String>("provider").map(String::as_str);
                    print_json(&serde_json::to_value(gateway.list_product_types(provider)?)?)
                }
                other => bail!("unknown subcommand '{other}'"),
            }
        }
        None => bail!("a subcommand is required"),
    }
}

fn print_json(value: &Value) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(ExitCode::SUCCESS)
}

fn check_config(path: Option<&PathBuf>) -> Result<ExitCode> {
    let (document, source) = match path {
        Some(path) => (load_config_from_path(path)?, path.clone()),
        None => (load_config()?, default_config_path()),
    };
    let snapshot = CatalogSnapshot::compile(document, 1);
    println!("{}: {} provider(s) usable", source.display(), snapshot.providers.len());
    for provider in snapshot.providers.values() {
        println!("  ok       {} ({} product types)", provider.name, provider.products.len());
    }
    for failure in &snapshot.excluded {
        println!("  excluded {}: {}", failure.provider, failure.error);
    }
    if snapshot.excluded.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(5))
    }
}

async fn search(gateway: &Gateway, matches: &ArgMatches) -> Result<ExitCode> {
    let request = search_request(matches)?;
    let mode = matches.get_one::<SearchMode>("mode").copied().unwrap_or_default();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling search");
            on_interrupt.cancel();
        }
    });

    let results = gateway.search_with_cancel(&request, mode, cancel).await?;
    print_json(&results.to_geojson())
}

fn search_request(matches: &ArgMatches) -> Result<SearchRequest> {
    let product_type = matches
        .get_one::<String>("product-type")
        .context("--product-type is required")?;
    let mut request = SearchRequest::new(product_type.as_str());

    if let Some(bbox) = matches.get_one::<String>("bbox") {
        request.geometry = Some(Geometry::BoundingBox(parse_bbox(bbox)?));
    }
    if let Some(wkt) = matches.get_one::<String>("geometry") {
        request.geometry = Some(Geometry::from_wkt(wkt).with_context(|| format!("invalid --geometry '{wkt}'"))?);
    }
    let date = |name: &str| -> Result<_> {
        matches
            .get_one::<String>(name)
            .map(|text| parse_datetime_utc(text).ok_or_else(|| anyhow!("invalid --{name} '{text}'")))
            .transpose()
    };
    request.start = date("start")?;
    request.end = date("end")?;

    for filter in matches.get_many::<String>("filter").into_iter().flatten() {
        let (name, raw) = filter
            .split_once('=')
            .ok_or_else(|| anyhow!("filter '{filter}' must be name=value"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        request.filters.insert(name.trim().to_string(), value);
    }

    request.provider = matches.get_one::<String>("provider").cloned();
    request.page = matches.get_one::<u32>("page").copied();
    request.items_per_page = matches.get_one::<usize>("items-per-page").copied();
    request.count = matches.get_flag("count");
    if let Some(cursor) = matches.get_one::<String>("cursor") {
        let cursor: PageCursor = serde_json::from_str(cursor).context("invalid --cursor")?;
        request.cursor = Some(cursor);
    }
    debug!(?request, "parsed search request");
    Ok(request)
}

fn parse_bbox(text: &str) -> Result<BoundingBox> {
    let values: Vec<f64> = text
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("invalid --bbox '{text}'"))?;
    let [west, south, east, north] = values[..] else {
        bail!("--bbox needs four values, got {}", values.len());
    };
    Ok(BoundingBox::new(west, south, east, north)?)
}

fn crunch(matches: &ArgMatches) -> Result<ExitCode> {
    let input = matches.get_one::<PathBuf>("input").context("an input file is required")?;
    let results = SearchResults::load(input)?;
    let crunches = crunches(matches)?;
    print_json(&results.crunch_all(&crunches).to_geojson())
}

fn crunches(matches: &ArgMatches) -> Result<Vec<Crunch>> {
    let mut crunches = Vec::new();
    if matches.get_flag("remove-doubles") {
        crunches.push(Crunch::RemoveDoubles);
    }
    let date = |name: &str| -> Result<_> {
        matches
            .get_one::<String>(name)
            .map(|text| parse_datetime_utc(text).ok_or_else(|| anyhow!("invalid --{name} '{text}'")))
            .transpose()
    };
    let (start, end) = (date("start")?, date("end")?);
    if start.is_some() || end.is_some() {
        crunches.push(Crunch::Date { start, end });
    }
    for comparison in matches.get_many::<String>("property").into_iter().flatten() {
        let (name, operator, raw) = split_comparison(comparison)?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        crunches.push(Crunch::property(name, operator, value)?);
    }
    if let Some(extent) = matches.get_one::<String>("overlap") {
        let rule = if matches.get_flag("contains") {
            OverlapRule::Contains
        } else if matches.get_flag("within") {
            OverlapRule::Within
        } else if matches.get_flag("intersects") {
            OverlapRule::Intersects
        } else {
            OverlapRule::Minimum(matches.get_one::<f64>("minimum-overlap").copied().unwrap_or(0.0))
        };
        crunches.push(Crunch::overlap(parse_bbox(extent)?, rule)?);
    }
    if let Some(pattern) = matches.get_one::<String>("latest-by-name") {
        crunches.push(Crunch::latest_by_name(pattern)?);
    }
    Ok(crunches)
}

/// Splits `cloudCover<=20` into name, operator and raw value.
fn split_comparison(text: &str) -> Result<(&str, &str, &str)> {
    let at = text
        .find(['<', '>', '=', '!'])
        .ok_or_else(|| anyhow!("'{text}' has no comparison operator"))?;
    let width = if text[at + 1..].starts_with('=') { 2 } else { 1 };
    let name = text[..at].trim();
    if name.is_empty() {
        bail!("'{text}' has no property name");
    }
    Ok((name, &text[at..at + width], text[at + width..].trim()))
}

async fn queryables(gateway: &Gateway, matches: &ArgMatches) -> Result<ExitCode> {
    let product_type = matches
        .get_one::<String>("product-type")
        .context("--product-type is required")?;
    let provider = matches.get_one::<String>("provider").map(String::as_str);
    let queryables = gateway.list_queryables(provider, product_type).await?;
    print_json(&serde_json::to_value(queryables)?)
}
