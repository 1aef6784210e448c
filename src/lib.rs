//! Mapping and aggregation engine for dimensional spending datasets.
//!
//! A model document declares a dataset's dimensions, the column each
//! attribute is read from, and named views. The engine validates the model
//! into a [`schema::Schema`], maps flat rows into [`fact::FactRecord`]s,
//! indexes classifier taxonomies and runs grouped aggregations.

pub mod aggregate;
pub mod cli;
pub mod data;
pub mod error;
pub mod fact;
pub mod io_utils;
pub mod loader;
pub mod mapper;
pub mod query;
pub mod schema;
pub mod store;
pub mod table;
pub mod taxonomy;
pub mod validate;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    aggregate::Aggregator,
    cli::{AggregateArgs, Cli, Commands, InputArgs, LoadArgs, ModelArgs, TaxonomyArgs},
    loader::{LoadOptions, LoadReport, load_rows},
    query::{Cut, OrderKey, Query, parse_slice_group},
    schema::{DATASET_SUBJECT, ModelDocument, Schema},
    store::{FactStore, MemoryFactStore},
    taxonomy::TaxonomyIndex,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("spending_model", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate(args) => handle_validate(&args),
        Commands::Views(args) => handle_views(&args),
        Commands::Load(args) => handle_load(&args),
        Commands::Aggregate(args) => handle_aggregate(&args),
        Commands::Taxonomy(args) => handle_taxonomy(&args),
    }
}

fn handle_validate(args: &ModelArgs) -> Result<()> {
    let document = ModelDocument::load(&args.model)?;
    let schema = document
        .into_schema()
        .with_context(|| format!("Validating model {:?}", args.model))?;
    println!(
        "Model '{}' is valid: {} dimension(s), {} mapped field(s), {} view(s)",
        schema.dataset().name,
        schema.dimensions().len(),
        schema.fields().len(),
        schema.views().len()
    );
    Ok(())
}

fn handle_views(args: &ModelArgs) -> Result<()> {
    let schema = Schema::load(&args.model)?;

    let headers: Vec<String> = ["dimension", "type", "datatype", "flags", "label"]
        .into_iter()
        .map(String::from)
        .collect();
    let rows: Vec<Vec<String>> = schema
        .dimensions()
        .iter()
        .map(|dim| {
            let mut flags = Vec::new();
            if dim.key {
                flags.push("key".to_string());
            }
            if dim.facet {
                flags.push("facet".to_string());
            }
            if let (Some(taxonomy), Some(level)) = (&dim.taxonomy, dim.level) {
                flags.push(format!("{taxonomy}@{level}"));
            }
            let datatype = match dim.scalar_datatype() {
                Some(datatype) => datatype.to_string(),
                None => dim
                    .attributes()
                    .iter()
                    .map(|attr| attr.name.as_str())
                    .collect::<Vec<_>>()
                    .join("|"),
            };
            vec![
                dim.name.clone(),
                dim.kind.as_str().to_string(),
                datatype,
                flags.join(","),
                dim.label.clone(),
            ]
        })
        .collect();
    table::print_table(&headers, &rows);
    println!();

    let headers: Vec<String> = ["entity", "name", "dimension", "breakdown", "label"]
        .into_iter()
        .map(String::from)
        .collect();
    let rows: Vec<Vec<String>> = schema
        .views()
        .iter()
        .map(|view| {
            vec![
                view.scope.to_string(),
                view.name.clone(),
                view.dimension.clone(),
                view.breakdown_name.clone(),
                view.label.clone(),
            ]
        })
        .collect();
    table::print_table(&headers, &rows);
    Ok(())
}

fn load_store(input: &InputArgs) -> Result<(Schema, MemoryFactStore, LoadReport, usize)> {
    let schema = Schema::load(&input.model)?;
    let encoding = io_utils::resolve_encoding(input.input_encoding.as_deref())?;
    info!(
        "Reading rows from '{}' with delimiter '{}'",
        input.input.display(),
        printable_delimiter(io_utils::resolve_input_delimiter(&input.input, input.delimiter))
    );
    let rows = io_utils::read_source_rows(&input.input, input.delimiter, encoding)
        .with_context(|| format!("Reading rows from {:?}", input.input))?;

    let mut options = LoadOptions::new(input.mode.into());
    if let Some(workers) = input.workers {
        options = options.with_workers(workers);
    }
    let mut store = MemoryFactStore::new();
    let report = load_rows(&schema, &rows, &mut store, &options)
        .with_context(|| format!("Mapping rows from {:?}", input.input))?;
    for skipped in &report.skipped {
        debug!("Skipped row {}: {}", skipped.row, skipped.error);
    }
    Ok((schema, store, report, options.workers))
}

fn handle_load(args: &LoadArgs) -> Result<()> {
    let (schema, store, report, _) = load_store(&args.input)?;
    if let Some(path) = &args.output {
        let mut writer = io_utils::open_output(Some(path))?;
        let written = io_utils::write_facts_jsonl(&schema, &store, &mut *writer)
            .with_context(|| format!("Writing facts to {path:?}"))?;
        info!("Wrote {written} fact(s) to {path:?}");
    }
    eprintln!(
        "Loaded {} row(s) into {} fact(s); {} replaced, {} skipped",
        report.loaded,
        store.len(),
        report.replaced,
        report.skipped_count()
    );
    Ok(())
}

fn handle_aggregate(args: &AggregateArgs) -> Result<()> {
    let (schema, store, _, workers) = load_store(&args.input)?;
    let aggregator = Aggregator::new(&schema).with_workers(workers);

    if let Some(view) = &args.view {
        let entity = args.entity.as_deref().unwrap_or(DATASET_SUBJECT);
        let result = aggregator.execute_view(
            &store,
            entity,
            view,
            args.dimension.as_deref(),
            args.member.as_deref(),
        )?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print!("{}", table::render_view(&result));
        }
        return Ok(());
    }

    let query = build_query(args)?;
    let result = aggregator.aggregate(&query, &store)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", table::render_aggregate(&result));
    }
    Ok(())
}

fn build_query(args: &AggregateArgs) -> Result<Query> {
    let mut query = Query::new();
    query.drilldowns = args.drilldowns.clone();
    query.cuts = args
        .cuts
        .iter()
        .map(|cut| Cut::parse(cut))
        .collect::<Result<_, _>>()?;
    query.slice = args
        .slices
        .iter()
        .map(|group| parse_slice_group(group))
        .collect::<Result<_, _>>()?;
    query.measures = args.measures.clone();
    query.order = args
        .order
        .iter()
        .map(|key| OrderKey::parse(key))
        .collect::<Result<_, _>>()?;
    query.page = args.page;
    query.pagesize = args.pagesize;
    debug!("Aggregate query: {query:?}");
    Ok(query)
}

fn handle_taxonomy(args: &TaxonomyArgs) -> Result<()> {
    let (schema, store, _, _) = load_store(&args.input)?;
    if schema.taxonomy(&args.taxonomy).is_none() {
        return Err(anyhow!(
            "Model '{}' declares no taxonomy '{}'",
            schema.dataset().name,
            args.taxonomy
        ));
    }
    let index = TaxonomyIndex::build(&schema, &store);
    let levels = match args.level {
        Some(level) => vec![level],
        None => index.levels(&args.taxonomy),
    };
    for level in levels {
        let dimension = index
            .level_dimension(&args.taxonomy, level)
            .ok_or_else(|| anyhow!("Taxonomy '{}' has no level {level}", args.taxonomy))?;
        println!("{} level {level} ({dimension})", args.taxonomy);
        print!(
            "{}",
            table::render_members(&index.members(&args.taxonomy, level))
        );
    }
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
